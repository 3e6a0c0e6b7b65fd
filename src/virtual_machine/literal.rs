//! Typed literal values understood by the assembler.
//!
//! A literal token is either double-quoted UTF-8 text or a number with a
//! case-insensitive type suffix:
//!
//! | suffix | type |
//! |---|---|
//! | `f`  | 32-bit float |
//! | `d`  | 64-bit float |
//! | `u`  | 32-bit unsigned |
//! | `i`  | 32-bit signed |
//! | `l`  | 64-bit signed |
//! | `ul` | 64-bit unsigned |
//! | `b`  | 8-bit unsigned |

use crate::virtual_machine::errors::VMError;
use std::fmt;
use std::str::FromStr;

/// Fixed-width (or length-prefixed text) value with a little-endian encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    U8(u8),
    I16(i16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Text(String),
}

/// Suffixes in match order; `ul` must be tried before `l` and `u`.
const SUFFIXES: &[&str] = &["ul", "f", "d", "u", "i", "l", "b"];

impl Literal {
    /// Parses a literal token.
    pub fn parse(token: &str) -> Result<Self, VMError> {
        if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
            return Ok(Literal::Text(token[1..token.len() - 1].to_string()));
        }

        let lower = token.to_ascii_lowercase();
        let invalid = || VMError::InvalidLiteral {
            token: token.to_string(),
        };

        let suffix = SUFFIXES
            .iter()
            .find(|s| lower.ends_with(*s))
            .ok_or_else(invalid)?;
        let body = &lower[..lower.len() - suffix.len()];
        if body.is_empty() {
            return Err(invalid());
        }

        let lit = match *suffix {
            "f" => Literal::F32(number(body).ok_or_else(invalid)?),
            "d" => Literal::F64(number(body).ok_or_else(invalid)?),
            "u" => Literal::U32(number(body).ok_or_else(invalid)?),
            "i" => Literal::I32(number(body).ok_or_else(invalid)?),
            "l" => Literal::I64(number(body).ok_or_else(invalid)?),
            "ul" => Literal::U64(number(body).ok_or_else(invalid)?),
            _ => Literal::U8(number(body).ok_or_else(invalid)?),
        };
        Ok(lit)
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Literal::U8(_) => 1,
            Literal::I16(_) => 2,
            Literal::I32(_) | Literal::U32(_) | Literal::F32(_) => 4,
            Literal::I64(_) | Literal::U64(_) | Literal::F64(_) => 8,
            Literal::Text(s) => 4 + s.len(),
        }
    }

    /// Appends the little-endian encoding; text is a `u32` length prefix followed by its bytes.
    ///
    /// Text longer than `u32::MAX` bytes cannot be prefixed and is rejected.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), VMError> {
        match self {
            Literal::U8(v) => out.push(*v),
            Literal::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Literal::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Literal::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Literal::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Literal::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Literal::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Literal::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Literal::Text(s) => {
                out.extend_from_slice(&length_prefix(s.len())?.to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
        Ok(())
    }

    /// Type and value equality, floats compared by bit pattern.
    pub fn same_value(&self, other: &Literal) -> bool {
        match (self, other) {
            (Literal::F32(a), Literal::F32(b)) => a.to_bits() == b.to_bits(),
            (Literal::F64(a), Literal::F64(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

fn length_prefix(len: usize) -> Result<u32, VMError> {
    u32::try_from(len).map_err(|_| VMError::TextTooLong { len })
}

fn number<T: FromStr>(body: &str) -> Option<T> {
    body.parse().ok()
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::U8(v) => write!(f, "{v}b"),
            Literal::I16(v) => write!(f, "{v}s"),
            Literal::I32(v) => write!(f, "{v}i"),
            Literal::U32(v) => write!(f, "{v}u"),
            Literal::I64(v) => write!(f, "{v}l"),
            Literal::U64(v) => write!(f, "{v}ul"),
            Literal::F32(v) => write!(f, "{v}f"),
            Literal::F64(v) => write!(f, "{v}d"),
            Literal::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Text(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Text(s)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::I64(v)
    }
}

impl From<u64> for Literal {
    fn from(v: u64) -> Self {
        Literal::U64(v)
    }
}

impl From<u8> for Literal {
    fn from(v: u8) -> Self {
        Literal::U8(v)
    }
}
