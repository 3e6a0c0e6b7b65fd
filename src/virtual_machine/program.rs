//! Binary program representation and disassembly.
//!
//! The binary format is headerless: a flat little-endian instruction stream
//! loaded at address 0, followed by whatever data the assembler appended.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Instruction, OperandKind};
use std::fmt;
use std::fmt::Write;
use std::fs;
use std::path::Path;

/// Assembled program image.
///
/// `code_len` marks where instructions end and appended data begins. Images
/// read from disk carry no such marker and are treated as all code.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Program {
    bytes: Vec<u8>,
    code_len: usize,
}

impl Program {
    pub fn new(bytes: Vec<u8>, code_len: usize) -> Self {
        let code_len = code_len.min(bytes.len());
        Self { bytes, code_len }
    }

    /// Reads a program image from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VMError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| VMError::IoError(format!("{}: {e}", path.display())))?;
        Ok(Self::from(bytes))
    }

    /// Writes the raw image to disk.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), VMError> {
        let path = path.as_ref();
        fs::write(path, &self.bytes).map_err(|e| VMError::IoError(format!("{}: {e}", path.display())))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Text section: instructions and any literals emitted inline with `ref`.
    pub fn code(&self) -> &[u8] {
        &self.bytes[..self.code_len]
    }

    /// Data appended after the instructions.
    pub fn data(&self) -> &[u8] {
        &self.bytes[self.code_len..]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for Program {
    fn from(bytes: Vec<u8>) -> Self {
        let code_len = bytes.len();
        Self { bytes, code_len }
    }
}

/// Decoded operand value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operand {
    Reg(u8),
    Imm8(u8),
    Imm64(i64),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "r{r}"),
            Operand::Imm8(v) => write!(f, "{v}"),
            Operand::Imm64(v) => write!(f, "{v:#x}"),
        }
    }
}

/// One decoded instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedInstruction {
    pub offset: u64,
    pub instruction: Instruction,
    pub operands: Vec<Operand>,
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}: {}", self.offset, self.instruction.mnemonic())?;
        for (i, op) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{op}")?;
        }
        Ok(())
    }
}

/// Decodes the instruction starting at `ip`. Returns it with the offset of
/// the next instruction.
fn decode_at(bytes: &[u8], ip: usize) -> Result<(DecodedInstruction, usize), VMError> {
    let offset = ip as u64;
    let opcode = *bytes.get(ip).ok_or(VMError::MemoryOutOfBounds {
        addr: offset,
        len: bytes.len() as u64,
    })?;
    let instruction = Instruction::try_from(opcode)
        .map_err(|_| VMError::InvalidInstruction { opcode, offset })?;

    let mut at = ip + 1;
    let mut operands = Vec::with_capacity(instruction.operands().len());
    for kind in instruction.operands() {
        let size = kind.size();
        let raw = bytes.get(at..at + size).ok_or(VMError::MemoryOutOfBounds {
            addr: at as u64,
            len: bytes.len() as u64,
        })?;
        operands.push(match kind {
            OperandKind::Reg => Operand::Reg(raw[0]),
            OperandKind::Imm8 => Operand::Imm8(raw[0]),
            OperandKind::Imm64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                Operand::Imm64(i64::from_le_bytes(buf))
            }
        });
        at += size;
    }

    let decoded = DecodedInstruction {
        offset,
        instruction,
        operands,
    };
    Ok((decoded, at))
}

/// Decodes `bytes[start..end]` as a linear instruction stream.
///
/// Decoding is linear, so data appended after the last instruction must be
/// excluded by `end`. Unknown opcodes are [`VMError::InvalidInstruction`] and
/// truncated operands are [`VMError::MemoryOutOfBounds`].
pub fn disassemble_range(
    bytes: &[u8],
    start: usize,
    end: usize,
) -> Result<Vec<DecodedInstruction>, VMError> {
    let bytes = &bytes[..end.min(bytes.len())];
    let mut out = Vec::new();
    let mut ip = start;

    while ip < bytes.len() {
        let (decoded, next) = decode_at(bytes, ip)?;
        out.push(decoded);
        ip = next;
    }

    Ok(out)
}

/// Decodes the whole image as instructions.
pub fn disassemble(bytes: &[u8]) -> Result<Vec<DecodedInstruction>, VMError> {
    disassemble_range(bytes, 0, bytes.len())
}

/// Decodes instructions from offset 0 up to the first byte that does not
/// start a complete instruction. Returns the listing and the offset where
/// decoding stopped.
///
/// Inline literals placed after the last instruction end the listing there
/// instead of failing it.
pub fn disassemble_prefix(bytes: &[u8]) -> (Vec<DecodedInstruction>, usize) {
    let mut out = Vec::new();
    let mut ip = 0;
    while ip < bytes.len() {
        match decode_at(bytes, ip) {
            Ok((decoded, next)) => {
                out.push(decoded);
                ip = next;
            }
            Err(_) => break,
        }
    }
    (out, ip)
}

/// Human readable listing: the decodable instructions of the code section,
/// then every remaining byte as hex rows of 16.
pub fn render_listing(program: &Program) -> String {
    let bytes = program.bytes();
    let (listing, stop) = disassemble_prefix(program.code());

    let mut out = String::new();
    for line in &listing {
        let _ = writeln!(out, "{line}");
    }

    let rest = &bytes[stop..];
    if !rest.is_empty() {
        let _ = writeln!(out, "; data: {} bytes at {:#x}", rest.len(), stop);
        for (row, chunk) in rest.chunks(16).enumerate() {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
            let _ = writeln!(out, "{:08x}: {}", stop + row * 16, hex.join(" "));
        }
    }
    out
}
