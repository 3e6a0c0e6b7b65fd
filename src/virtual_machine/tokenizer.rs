//! Lexer for assembler source.
//!
//! Rules:
//! - the comment character suppresses everything up to the end of the line
//! - a double quote toggles quote mode; a quoted token keeps both quotes and
//!   may contain whitespace, `\n` and `\t` escapes are substituted
//! - configured symbol characters always form one-character tokens
//! - any other run of non-whitespace is a single token

use crate::virtual_machine::errors::VMError;

/// Token text with its 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub line: usize,
    pub column: usize,
}

/// Configurable single pass tokenizer.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    comment: Option<char>,
    symbols: Vec<char>,
}

impl Tokenizer {
    pub fn new(comment: Option<char>, symbols: &[char]) -> Self {
        Self {
            comment,
            symbols: symbols.to_vec(),
        }
    }

    /// Splits `input` into tokens.
    ///
    /// Returns [`VMError::UnterminatedString`] (wrapped with its position) if
    /// the input ends inside quote mode.
    pub fn tokenize(&self, input: &str) -> Result<Vec<Token>, VMError> {
        let mut out = Vec::new();
        let mut tmp = String::new();
        let mut start = (1usize, 1usize);
        let mut in_quote = false;
        let mut in_comment = false;
        let (mut line, mut column) = (1usize, 0usize);

        for c in input.chars() {
            if c == '\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
            let pos = if c == '\n' { (line - 1, column) } else { (line, column) };

            if !in_quote {
                if Some(c) == self.comment {
                    in_comment = true;
                } else if c == '\n' {
                    in_comment = false;
                }
                if in_comment {
                    continue;
                }
            }

            if c == '"' {
                in_quote = !in_quote;
                if in_quote {
                    flush(&mut out, &mut tmp, start);
                    start = pos;
                    tmp.push(c);
                } else {
                    tmp.push(c);
                    let text = tmp.replace("\\n", "\n").replace("\\t", "\t");
                    out.push(Token {
                        text,
                        line: start.0,
                        column: start.1,
                    });
                    tmp.clear();
                }
                continue;
            }

            if in_quote {
                tmp.push(c);
                continue;
            }

            if self.symbols.contains(&c) {
                flush(&mut out, &mut tmp, start);
                out.push(Token {
                    text: c.to_string(),
                    line: pos.0,
                    column: pos.1,
                });
                continue;
            }

            if c.is_whitespace() {
                flush(&mut out, &mut tmp, start);
            } else {
                if tmp.is_empty() {
                    start = pos;
                }
                tmp.push(c);
            }
        }

        if in_quote {
            return Err(VMError::AssemblyError {
                line: start.0,
                offset: start.1,
                message: VMError::UnterminatedString.to_string(),
            });
        }
        flush(&mut out, &mut tmp, start);

        Ok(out)
    }
}

fn flush(out: &mut Vec<Token>, tmp: &mut String, start: (usize, usize)) {
    if !tmp.is_empty() {
        out.push(Token {
            text: std::mem::take(tmp),
            line: start.0,
            column: start.1,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    fn asm_tokenizer() -> Tokenizer {
        Tokenizer::new(Some(';'), &['&', ','])
    }

    #[test]
    fn whitespace_delimits() {
        let tokens = asm_tokenizer().tokenize("  MOV_R_64\t a  b\n c ").unwrap();
        assert_eq!(texts(&tokens), vec!["MOV_R_64", "a", "b", "c"]);
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let tokens = asm_tokenizer()
            .tokenize("NOP ; ignored HALT\nHALT")
            .unwrap();
        assert_eq!(texts(&tokens), vec!["NOP", "HALT"]);
    }

    #[test]
    fn symbols_split_adjacent_text() {
        let tokens = asm_tokenizer().tokenize("&label,ref 1b").unwrap();
        assert_eq!(texts(&tokens), vec!["&", "label", ",", "ref", "1b"]);
    }

    #[test]
    fn quoted_text_keeps_whitespace_and_quotes() {
        let tokens = asm_tokenizer()
            .tokenize("PUSHS_64 \"hello, world ; not a comment\"")
            .unwrap();
        assert_eq!(
            texts(&tokens),
            vec!["PUSHS_64", "\"hello, world ; not a comment\""]
        );
    }

    #[test]
    fn quote_escapes_substituted() {
        let tokens = asm_tokenizer().tokenize(r#""a\nb\tc""#).unwrap();
        assert_eq!(texts(&tokens), vec!["\"a\nb\tc\""]);
    }

    #[test]
    fn quote_splits_from_preceding_text() {
        let tokens = asm_tokenizer().tokenize(r#"x"y z"w"#).unwrap();
        assert_eq!(texts(&tokens), vec!["x", "\"y z\"", "w"]);
    }

    #[test]
    fn unterminated_quote_fails() {
        let err = asm_tokenizer().tokenize("NOP\n  \"open").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 2, offset: 3, ref message } if message.contains("unterminated")
        ));
    }

    #[test]
    fn positions_tracked() {
        let tokens = asm_tokenizer().tokenize("NOP\n  HALT &x").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 8));
        assert_eq!((tokens[3].line, tokens[3].column), (2, 9));
    }

    #[test]
    fn no_comment_character() {
        let tokens = Tokenizer::new(None, &[]).tokenize("a ; b").unwrap();
        assert_eq!(texts(&tokens), vec!["a", ";", "b"]);
    }
}
