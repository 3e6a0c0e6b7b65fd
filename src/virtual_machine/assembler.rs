//! Two-pass symbolic assembler.
//!
//! Builds two ordered object sequences, text and data, and serializes
//! `text ++ data` into the flat binary program format. Labels are zero-width
//! markers; an address-of is an 8-byte placeholder resolved in the second pass
//! to the absolute offset of its label, so forward references are legal.
//!
//! # Syntax
//!
//! ```text
//! start:                      ; label definition
//!     MOV_R_64 ref 0b, ref 5l ; mnemonic followed by inline literals
//!     PUSHS_64 "hello"        ; bare literal, interned as data
//!     JMP_64 &start           ; address of a label
//! ```
//!
//! - `;` starts a comment, `,` is a separator
//! - a bare identifier matching a mnemonic emits that opcode byte
//! - `ref <literal>` emits the literal encoding inline
//! - any other literal is interned into the data section and its address is
//!   emitted; equal literals share one entry named `DTA_<n>`
//! - literal grammar is documented in [`literal`](crate::virtual_machine::literal)

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::literal::Literal;
use crate::virtual_machine::program::Program;
use crate::virtual_machine::tokenizer::{Token, Tokenizer};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: char = ';';
const SYMBOLS: &[char] = &['&', ',', ';'];
const LABEL_SUFFIX: char = ':';
const DATA_LABEL_PREFIX: &str = "DTA_";

/// Formats a compiler-style diagnostic for assembly failures.
fn render_assembly_diagnostic(
    file: &str,
    source: &str,
    line: usize,
    offset: usize,
    message: &str,
) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

/// Emit a helpful diagnostic to stderr for assembly errors.
fn log_assembly_error(file: &str, source: &str, err: &VMError) {
    if let VMError::AssemblyError {
        line,
        offset,
        message,
    } = err
    {
        eprintln!(
            "{}",
            render_assembly_diagnostic(file, source, *line, *offset, message)
        );
    } else {
        eprintln!("error: {err}");
    }
}

/// One element of the text or data sequence.
#[derive(Clone, Debug, PartialEq)]
enum Object {
    Label(String),
    AddressOf(String),
    Literal(Literal),
}

impl Object {
    fn size(&self) -> usize {
        match self {
            Object::Label(_) => 0,
            Object::AddressOf(_) => 8,
            Object::Literal(lit) => lit.size(),
        }
    }
}

/// Program builder holding the text and data sequences.
///
/// Methods chain; nothing is resolved until [`Assembler::to_bytes`].
#[derive(Clone, Debug, Default)]
pub struct Assembler {
    text: Vec<Object>,
    data: Vec<Object>,
    data_count: usize,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instr(&mut self, instr: Instruction) -> &mut Self {
        self.raw(Literal::U8(instr as u8))
    }

    pub fn reg(&mut self, index: u8) -> &mut Self {
        self.raw(Literal::U8(index))
    }

    pub fn int8(&mut self, value: u8) -> &mut Self {
        self.raw(Literal::U8(value))
    }

    pub fn int16(&mut self, value: i16) -> &mut Self {
        self.raw(Literal::I16(value))
    }

    pub fn int32(&mut self, value: i32) -> &mut Self {
        self.raw(Literal::I32(value))
    }

    pub fn int64(&mut self, value: i64) -> &mut Self {
        self.raw(Literal::I64(value))
    }

    /// Emits `literal` inline in the text sequence.
    pub fn raw(&mut self, literal: impl Into<Literal>) -> &mut Self {
        self.text.push(Object::Literal(literal.into()));
        self
    }

    /// Defines `name` at the current text position.
    pub fn label(&mut self, name: impl Into<String>) -> &mut Self {
        self.text.push(Object::Label(name.into()));
        self
    }

    /// Emits the 8-byte absolute address of `name`.
    pub fn address_of(&mut self, name: impl Into<String>) -> &mut Self {
        self.text.push(Object::AddressOf(name.into()));
        self
    }

    /// Appends `name: literal` to the data section and emits its address.
    pub fn data_named(&mut self, name: impl Into<String>, literal: impl Into<Literal>) -> &mut Self {
        let name = name.into();
        self.address_of(name.clone());
        self.data.push(Object::Label(name));
        self.data.push(Object::Literal(literal.into()));
        self
    }

    /// Interns `literal` into the data section and emits its address.
    ///
    /// A value equal to one interned before (same type and value) reuses the
    /// existing entry.
    pub fn data(&mut self, literal: impl Into<Literal>) -> &mut Self {
        let literal = literal.into();
        let existing = self.data.windows(2).find_map(|pair| match pair {
            [Object::Label(name), Object::Literal(stored)] if stored.same_value(&literal) => {
                Some(name.clone())
            }
            _ => None,
        });

        match existing {
            Some(name) => self.address_of(name),
            None => {
                let name = format!("{DATA_LABEL_PREFIX}{}", self.data_count);
                self.data_count += 1;
                self.data_named(name, literal)
            }
        }
    }

    /// Number of entries in the data section.
    pub fn data_entries(&self) -> usize {
        self.data
            .iter()
            .filter(|obj| matches!(obj, Object::Literal(_)))
            .count()
    }

    /// Whether `name` is defined in the text or data sequence.
    fn defines(&self, name: &str) -> bool {
        self.text
            .iter()
            .chain(self.data.iter())
            .any(|obj| matches!(obj, Object::Label(label) if label == name))
    }

    /// Serializes into a [`Program`] whose code section is the text sequence.
    pub fn to_program(&self) -> Result<Program, VMError> {
        let code_len = self.text.iter().map(Object::size).sum();
        Ok(Program::new(self.to_bytes()?, code_len))
    }

    /// Serializes `text ++ data`, resolving every address-of.
    pub fn to_bytes(&self) -> Result<Vec<u8>, VMError> {
        let objects = || self.text.iter().chain(self.data.iter());

        // First pass: label offsets.
        let mut labels: HashMap<&str, u64> = HashMap::new();
        let mut offset = 0u64;
        for obj in objects() {
            if let Object::Label(name) = obj {
                match labels.entry(name.as_str()) {
                    Entry::Occupied(_) => {
                        return Err(VMError::DuplicateLabel {
                            label: name.clone(),
                        });
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(offset);
                    }
                }
            }
            offset += obj.size() as u64;
        }

        // Second pass: emit.
        let mut out = Vec::with_capacity(offset as usize);
        for obj in objects() {
            match obj {
                Object::Label(_) => {}
                Object::AddressOf(name) => {
                    let addr = labels
                        .get(name.as_str())
                        .ok_or_else(|| VMError::UndefinedLabel {
                            label: name.clone(),
                        })?;
                    out.extend_from_slice(&addr.to_le_bytes());
                }
                Object::Literal(lit) => lit.encode(&mut out)?,
            }
        }

        Ok(out)
    }
}

fn at(token: &Token, err: VMError) -> VMError {
    VMError::AssemblyError {
        line: token.line,
        offset: token.column,
        message: err.to_string(),
    }
}

/// Next token that can serve as an operand of `directive`.
fn operand<'a>(
    tokens: &'a [Token],
    i: &mut usize,
    directive: &'static str,
    owner: &Token,
) -> Result<&'a Token, VMError> {
    *i += 1;
    match tokens.get(*i) {
        Some(tok) if !SYMBOLS.iter().any(|s| tok.text.len() == 1 && tok.text.starts_with(*s)) => {
            Ok(tok)
        }
        _ => Err(at(owner, VMError::MissingArgument { directive })),
    }
}

/// Parses source text into a populated [`Assembler`].
fn parse_source(source: &str) -> Result<Assembler, VMError> {
    let tokens = Tokenizer::new(Some(COMMENT_CHAR), SYMBOLS).tokenize(source)?;
    let mut asm = Assembler::new();
    // Source position of each label definition and first reference, for diagnostics.
    let mut defined: HashMap<String, &Token> = HashMap::new();
    let mut referenced: HashMap<String, &Token> = HashMap::new();

    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        let text = tok.text.as_str();

        if text == "," || text == ";" {
            // separators
        } else if text.len() > 1 && text.ends_with(LABEL_SUFFIX) && !text.starts_with('"') {
            let name = &text[..text.len() - 1];
            if defined.insert(name.to_string(), tok).is_some() {
                return Err(at(
                    tok,
                    VMError::DuplicateLabel {
                        label: name.to_string(),
                    },
                ));
            }
            asm.label(name);
        } else if text == "&" {
            let target = operand(&tokens, &mut i, "&", tok)?;
            referenced.entry(target.text.clone()).or_insert(tok);
            asm.address_of(target.text.as_str());
        } else if text == "ref" {
            let value = operand(&tokens, &mut i, "ref", tok)?;
            asm.raw(Literal::parse(&value.text).map_err(|e| at(value, e))?);
        } else if let Some(instr) = Instruction::from_mnemonic(text) {
            asm.instr(instr);
        } else {
            asm.data(Literal::parse(text).map_err(|e| at(tok, e))?);
        }

        i += 1;
    }

    // Pin resolution failures to the source that caused them.
    if let Some((label, tok)) = referenced
        .iter()
        .filter(|(name, _)| !asm.defines(name))
        .min_by_key(|(_, tok)| (tok.line, tok.column))
    {
        return Err(at(
            tok,
            VMError::UndefinedLabel {
                label: label.clone(),
            },
        ));
    }

    Ok(asm)
}

/// Assemble a full source string into a program.
pub fn assemble_source(source: impl Into<String>) -> Result<Program, VMError> {
    assemble_source_with_name(source.into(), "<source>")
}

/// Assembles source with an associated filename for error diagnostics.
///
/// Logs a compiler-style diagnostic to stderr on failure.
fn assemble_source_with_name(source: String, source_name: &str) -> Result<Program, VMError> {
    let result = parse_source(&source).and_then(|asm| asm.to_program());

    if let Err(err) = &result {
        log_assembly_error(source_name, &source, err);
    }

    result
}

/// Convenience: assemble directly from file path
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Program, VMError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref)
        .map_err(|e| VMError::IoError(format!("{}: {e}", path_ref.display())))?;
    assemble_source_with_name(source, &path_ref.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(source: &str) -> Vec<u8> {
        assemble_source(source).unwrap().bytes().to_vec()
    }

    fn le(v: u64) -> [u8; 8] {
        v.to_le_bytes()
    }

    fn assembly_error(source: &str) -> (usize, usize, String) {
        match assemble_source(source) {
            Err(VMError::AssemblyError {
                line,
                offset,
                message,
            }) => (line, offset, message),
            other => panic!("expected assembly error, got {other:?}"),
        }
    }

    #[test]
    fn assemble_empty_source() {
        assert!(bytes("").is_empty());
        assert!(bytes("  ; only a comment\n\n").is_empty());
    }

    #[test]
    fn assemble_mnemonics() {
        assert_eq!(bytes("NOP HALT\nRET"), vec![0x01, 0x02, 0x24]);
    }

    #[test]
    fn inline_literals_with_ref() {
        let mut expected = vec![Instruction::MovR64 as u8, 0];
        expected.extend_from_slice(&le(5));
        assert_eq!(bytes("MOV_R_64 ref 0b, ref 5l"), expected);
    }

    #[test]
    fn bare_literal_is_interned() {
        // PUSH_64 <addr> HALT <data: 5l>
        let mut expected = vec![Instruction::Push64 as u8];
        expected.extend_from_slice(&le(10));
        expected.push(Instruction::Halt as u8);
        expected.extend_from_slice(&5i64.to_le_bytes());
        assert_eq!(bytes("PUSH_64 5l\nHALT"), expected);
    }

    #[test]
    fn duplicate_strings_share_one_entry() {
        let out = bytes("PUSHS_64 \"same string\"\nPUSHS_64 \"same string\"\nHALT");
        // 2 * (1 + 8) + 1 bytes of text, then one 4 + 11 byte string.
        assert_eq!(out.len(), 19 + 15);
        assert_eq!(out[1..9], out[10..18]);
        assert_eq!(out[1..9], le(19));
        assert_eq!(&out[23..], b"same string");
    }

    #[test]
    fn builder_data_interning() {
        let mut asm = Assembler::new();
        asm.data("same string").data("same string");
        assert_eq!(asm.data_entries(), 1);
        let out = asm.to_bytes().unwrap();
        assert_eq!(out[0..8], out[8..16]);
        assert_eq!(out[0..8], le(16));
    }

    #[test]
    fn interning_distinguishes_types() {
        let mut asm = Assembler::new();
        asm.data(Literal::I64(1))
            .data(Literal::U64(1))
            .data(Literal::I64(1));
        assert_eq!(asm.data_entries(), 2);
        let out = asm.to_bytes().unwrap();
        assert_eq!(out[0..8], out[16..24]);
        assert_ne!(out[0..8], out[8..16]);
    }

    #[test]
    fn forward_reference_resolves() {
        let mut expected = vec![Instruction::Jmp64 as u8];
        expected.extend_from_slice(&le(10));
        expected.extend_from_slice(&[Instruction::Nop as u8, Instruction::Halt as u8]);
        assert_eq!(bytes("JMP_64 &end\nNOP\nend: HALT"), expected);
    }

    #[test]
    fn backward_reference_resolves() {
        let out = bytes("NOP\nloop: NOP\nJMP_64 &loop");
        assert_eq!(out[3..11], le(1));
    }

    #[test]
    fn label_after_all_text_points_at_data() {
        let out = bytes("PUSHS_64 \"x\"\nend:");
        assert_eq!(out[1..9], le(9));
    }

    #[test]
    fn builder_widths() {
        let mut asm = Assembler::new();
        asm.instr(Instruction::Nop)
            .reg(3)
            .int8(0xFF)
            .int16(-1)
            .int32(2)
            .int64(-2)
            .label("here")
            .address_of("here");
        let out = asm.to_bytes().unwrap();
        assert_eq!(out.len(), 1 + 1 + 1 + 2 + 4 + 8 + 8);
        assert_eq!(out[0..5], [0x01, 3, 0xFF, 0xFF, 0xFF]);
        assert_eq!(out[5..9], 2i32.to_le_bytes());
        assert_eq!(out[9..17], (-2i64).to_le_bytes());
        assert_eq!(out[17..25], le(17));
    }

    #[test]
    fn data_named_emits_named_entry() {
        let mut asm = Assembler::new();
        asm.data_named("greeting", "hi").address_of("greeting");
        let out = asm.to_bytes().unwrap();
        assert_eq!(out[0..8], le(16));
        assert_eq!(out[8..16], le(16));
        assert_eq!(out[16..], [2, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn program_splits_code_and_data() {
        let program = assemble_source("PUSHS_64 \"ab\"\nHALT").unwrap();
        assert_eq!(program.code().len(), 10);
        assert_eq!(program.data(), &[2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn to_bytes_is_repeatable() {
        let mut asm = Assembler::new();
        asm.data(7i64).instr(Instruction::Halt);
        assert_eq!(asm.to_bytes().unwrap(), asm.to_bytes().unwrap());
    }

    #[test]
    fn unsuffixed_literal_reports_position() {
        let (line, offset, message) = assembly_error("NOP\nPUSH_64 ref 5");
        assert_eq!((line, offset), (2, 13));
        assert!(message.contains("'5'"));

        let (line, offset, _) = assembly_error("MOV_R_64 ref 0b, 5");
        assert_eq!((line, offset), (1, 18));
    }

    #[test]
    fn undefined_label_is_fatal() {
        let (line, offset, message) = assembly_error("NOP\nJMP_64 &nowhere");
        assert_eq!((line, offset), (2, 8));
        assert_eq!(message, "symbol not found: nowhere");

        let mut asm = Assembler::new();
        asm.address_of("missing");
        assert!(matches!(
            asm.to_bytes(),
            Err(VMError::UndefinedLabel { label }) if label == "missing"
        ));
    }

    #[test]
    fn undefined_data_label_reports_position() {
        let (line, offset, message) = assembly_error("PUSH_64 5l\nJMP_64 &DTA_9");
        assert_eq!((line, offset), (2, 8));
        assert_eq!(message, "symbol not found: DTA_9");
    }

    #[test]
    fn interned_label_can_be_referenced() {
        let out = bytes("PUSH_64 5l\nJMP_64 &DTA_0");
        assert_eq!(out[1..9], out[10..18]);
    }

    #[test]
    fn duplicate_label_is_fatal() {
        let (line, _, message) = assembly_error("a: NOP\na: HALT");
        assert_eq!(line, 2);
        assert!(message.contains("duplicate label"));

        let mut asm = Assembler::new();
        asm.label("DTA_0").data(1i64);
        assert!(matches!(
            asm.to_bytes(),
            Err(VMError::DuplicateLabel { label }) if label == "DTA_0"
        ));
    }

    #[test]
    fn directive_without_argument() {
        let (_, _, message) = assembly_error("NOP ref");
        assert!(message.contains("'ref' expects an argument"));
        let (_, _, message) = assembly_error("JMP_64 &");
        assert!(message.contains("'&' expects an argument"));
        let (_, _, message) = assembly_error("JMP_64 & , x");
        assert!(message.contains("'&' expects an argument"));
    }

    #[test]
    fn mnemonics_are_case_sensitive() {
        let (_, _, message) = assembly_error("nop");
        assert!(message.contains("could not parse literal 'nop'"));
    }

    #[test]
    fn unterminated_string_reported() {
        let (line, offset, message) = assembly_error("NOP\nPUSHS_64 \"abc");
        assert_eq!((line, offset), (2, 10));
        assert!(message.contains("unterminated"));
    }

    #[test]
    fn diagnostic_rendering() {
        let diag = render_assembly_diagnostic("prog.asm", "NOP\nPUSH_64 ref 5", 2, 13, "bad");
        assert_eq!(
            diag,
            "error: bad\n --> prog.asm:2:13\n  |\n   2 | PUSH_64 ref 5\n  |             ^\n"
        );
    }

    #[test]
    fn assemble_file_missing_is_io_error() {
        assert!(matches!(
            assemble_file("/definitely/not/here.asm"),
            Err(VMError::IoError(_))
        ));
    }
}
