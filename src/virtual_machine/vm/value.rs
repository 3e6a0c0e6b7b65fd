use crate::virtual_machine::errors::VMError;
use std::fmt;

/// Runtime value held on the engine stack.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// 64-bit signed integer. Addresses and raw words are stored here.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
}

/// Discriminant of a [`Value`], used to declare native call signatures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueKind {
    Int,
    Float,
    Text,
}

impl ValueKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Int => "Int",
            ValueKind::Float => "Float",
            ValueKind::Text => "Text",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
        }
    }

    /// Returns the type name for error messages.
    pub fn type_name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Integer view. Floats truncate toward zero, text must parse as an integer.
    pub fn as_i64(&self) -> Result<i64, VMError> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Float(v) => Ok(*v as i64),
            Value::Text(s) => s.trim().parse::<i64>().map_err(|_| VMError::TypeMismatch {
                expected: "Int",
                actual: format!("Text({s:?})"),
            }),
        }
    }

    /// Raw 64-bit word view, reinterpreting the integer bits.
    pub fn as_u64(&self) -> Result<u64, VMError> {
        match self {
            Value::Text(s) => {
                if let Ok(v) = s.trim().parse::<u64>() {
                    return Ok(v);
                }
                self.as_i64().map(|v| v as u64)
            }
            other => other.as_i64().map(|v| v as u64),
        }
    }

    pub fn as_f64(&self) -> Result<f64, VMError> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            Value::Text(s) => s.trim().parse::<f64>().map_err(|_| VMError::TypeMismatch {
                expected: "Float",
                actual: format!("Text({s:?})"),
            }),
        }
    }

    /// Text view. Numbers are formatted with their `Display` form.
    pub fn as_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Coerces this value into `kind`.
    pub fn coerce(&self, kind: ValueKind) -> Result<Value, VMError> {
        Ok(match kind {
            ValueKind::Int => Value::Int(self.as_i64()?),
            ValueKind::Float => Value::Float(self.as_f64()?),
            ValueKind::Text => Value::Text(self.as_text()),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Conversion from a stack [`Value`] into a concrete representation.
///
/// Narrow integer targets truncate to their width, matching how the
/// engine stores words.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, VMError>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, VMError> {
        value.as_i64()
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self, VMError> {
        value.as_u64()
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, VMError> {
        value.as_i64().map(|v| v as i32)
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Result<Self, VMError> {
        value.as_i64().map(|v| v as u32)
    }
}

impl FromValue for u8 {
    fn from_value(value: &Value) -> Result<Self, VMError> {
        value.as_i64().map(|v| v as u8)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, VMError> {
        value.as_f64()
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, VMError> {
        value.as_f64().map(|v| v as f32)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, VMError> {
        Ok(value.as_text())
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, VMError> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_coercions() {
        let v = Value::Int(-3);
        assert_eq!(v.as_i64().unwrap(), -3);
        assert_eq!(v.as_u64().unwrap(), u64::MAX - 2);
        assert_eq!(v.as_f64().unwrap(), -3.0);
        assert_eq!(v.as_text(), "-3");
    }

    #[test]
    fn float_truncates_to_int() {
        assert_eq!(Value::Float(2.9).as_i64().unwrap(), 2);
        assert_eq!(Value::Float(-2.9).as_i64().unwrap(), -2);
    }

    #[test]
    fn text_parses_numbers() {
        assert_eq!(Value::from("42").as_i64().unwrap(), 42);
        assert_eq!(Value::from(" 1.5 ").as_f64().unwrap(), 1.5);
        assert_eq!(
            Value::from("18446744073709551615").as_u64().unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn text_rejects_non_numbers() {
        assert!(matches!(
            Value::from("abc").as_i64(),
            Err(VMError::TypeMismatch { expected: "Int", .. })
        ));
        assert!(matches!(
            Value::from("abc").as_f64(),
            Err(VMError::TypeMismatch { expected: "Float", .. })
        ));
    }

    #[test]
    fn narrow_targets_truncate() {
        assert_eq!(u8::from_value(&Value::Int(0x1FF)).unwrap(), 0xFF);
        assert_eq!(i32::from_value(&Value::Int(-1)).unwrap(), -1);
        assert_eq!(u32::from_value(&Value::Int(-1)).unwrap(), u32::MAX);
    }

    #[test]
    fn coerce_changes_kind() {
        assert_eq!(
            Value::Int(7).coerce(ValueKind::Text).unwrap(),
            Value::Text("7".into())
        );
        assert_eq!(
            Value::from("7").coerce(ValueKind::Float).unwrap(),
            Value::Float(7.0)
        );
        assert_eq!(Value::Float(7.5).kind(), ValueKind::Float);
    }
}
