use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::vm::value::{FromValue, Value};

/// LIFO of [`Value`]s used for return addresses and native call marshalling.
///
/// Offsets count down from the top: offset 0 is the top element.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stack {
    values: Vec<Value>,
    limit: Option<usize>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stack that refuses to grow beyond `limit` values.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            values: Vec::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values from bottom to top.
    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn push(&mut self, value: impl Into<Value>) -> Result<(), VMError> {
        if let Some(limit) = self.limit
            && self.values.len() >= limit
        {
            return Err(VMError::StackOverflow { limit });
        }
        self.values.push(value.into());
        Ok(())
    }

    fn index_of(&self, offset: usize) -> Result<usize, VMError> {
        let len = self.values.len();
        if offset >= len {
            return Err(VMError::StackUnderflow {
                depth: offset.saturating_add(1),
                len,
            });
        }
        Ok(len - 1 - offset)
    }

    /// Removes and returns the top value.
    pub fn pop(&mut self) -> Result<Value, VMError> {
        self.pop_at(0)
    }

    /// Removes and returns the value `offset` positions below the top.
    pub fn pop_at(&mut self, offset: usize) -> Result<Value, VMError> {
        let idx = self.index_of(offset)?;
        Ok(self.values.remove(idx))
    }

    pub fn peek(&self) -> Result<&Value, VMError> {
        self.peek_at(0)
    }

    pub fn peek_at(&self, offset: usize) -> Result<&Value, VMError> {
        let idx = self.index_of(offset)?;
        Ok(&self.values[idx])
    }

    /// Pops the top value and coerces it to `T`.
    ///
    /// The value is consumed even if the coercion fails.
    pub fn pop_as<T: FromValue>(&mut self) -> Result<T, VMError> {
        let value = self.pop()?;
        T::from_value(&value)
    }

    /// Pops until exactly `count` values remain. Does nothing if the stack is
    /// already at or below `count`.
    pub fn set_count(&mut self, count: usize) {
        while self.values.len() > count {
            self.values.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_lifo() {
        let mut stack = Stack::new();
        stack.push(1i64).unwrap();
        stack.push(2i64).unwrap();
        stack.push("three").unwrap();
        assert_eq!(stack.pop().unwrap(), Value::Text("three".into()));
        assert_eq!(stack.pop().unwrap(), Value::Int(2));
        assert_eq!(stack.pop().unwrap(), Value::Int(1));
        assert!(stack.is_empty());
    }

    #[test]
    fn huge_offset_underflows() {
        let mut stack = Stack::new();
        stack.push(1i64).unwrap();
        assert!(matches!(
            stack.peek_at(usize::MAX),
            Err(VMError::StackUnderflow {
                depth: usize::MAX,
                len: 1
            })
        ));
        assert!(matches!(
            stack.pop_at(usize::MAX),
            Err(VMError::StackUnderflow { len: 1, .. })
        ));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn pop_on_empty_underflows() {
        let mut stack = Stack::new();
        assert!(matches!(
            stack.pop(),
            Err(VMError::StackUnderflow { depth: 1, len: 0 })
        ));
    }

    #[test]
    fn peek_and_pop_at_offsets() {
        let mut stack = Stack::new();
        for v in [10i64, 20, 30] {
            stack.push(v).unwrap();
        }
        assert_eq!(stack.peek().unwrap(), &Value::Int(30));
        assert_eq!(stack.peek_at(2).unwrap(), &Value::Int(10));
        assert!(matches!(
            stack.peek_at(3),
            Err(VMError::StackUnderflow { depth: 4, len: 3 })
        ));

        assert_eq!(stack.pop_at(1).unwrap(), Value::Int(20));
        assert_eq!(stack.as_slice(), &[Value::Int(10), Value::Int(30)]);
    }

    #[test]
    fn pop_as_coerces() {
        let mut stack = Stack::new();
        stack.push(Value::Float(3.75)).unwrap();
        stack.push("12").unwrap();
        assert_eq!(stack.pop_as::<u8>().unwrap(), 12);
        assert_eq!(stack.pop_as::<i64>().unwrap(), 3);
    }

    #[test]
    fn set_count_unwinds() {
        let mut stack = Stack::new();
        for v in 0..5i64 {
            stack.push(v).unwrap();
        }
        stack.set_count(2);
        assert_eq!(stack.as_slice(), &[Value::Int(0), Value::Int(1)]);
        stack.set_count(10);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn limit_rejects_growth() {
        let mut stack = Stack::with_limit(Some(2));
        stack.push(1i64).unwrap();
        stack.push(2i64).unwrap();
        assert!(matches!(
            stack.push(3i64),
            Err(VMError::StackOverflow { limit: 2 })
        ));
        stack.pop().unwrap();
        stack.push(3i64).unwrap();
    }
}
