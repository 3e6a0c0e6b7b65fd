use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::vm::value::{Value, ValueKind};
use std::collections::HashMap;

type NativeFn = Box<dyn FnMut(&[Value]) -> Result<Option<Value>, VMError>>;

/// Host callable with a fixed signature.
pub struct NativeFunction {
    params: Vec<ValueKind>,
    returns: Option<ValueKind>,
    func: NativeFn,
}

impl NativeFunction {
    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    pub fn returns(&self) -> Option<ValueKind> {
        self.returns
    }
}

/// Registry of named host functions reachable through `NATIVE_64`.
#[derive(Default)]
pub struct NativeRegistry {
    functions: HashMap<String, NativeFunction>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `func` under `name`, replacing any previous entry.
    ///
    /// Arguments reach `func` already coerced to `params`, in declaration order.
    /// A declared return kind makes the engine push the returned value (coerced
    /// to that kind); `func` returning `None` then is an error.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        params: &[ValueKind],
        returns: Option<ValueKind>,
        func: impl FnMut(&[Value]) -> Result<Option<Value>, VMError> + 'static,
    ) {
        self.functions.insert(
            name.into(),
            NativeFunction {
                params: params.to_vec(),
                returns,
                func: Box::new(func),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&NativeFunction> {
        self.functions.get(name)
    }

    /// Invokes `name` with already marshalled arguments.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, VMError> {
        let entry = self
            .functions
            .get_mut(name)
            .ok_or_else(|| VMError::UnknownNativeFunction {
                name: name.to_string(),
            })?;

        let result = (entry.func)(args)?;
        match (entry.returns, result) {
            (None, _) => Ok(None),
            (Some(kind), Some(value)) => value.coerce(kind).map(Some),
            (Some(kind), None) => Err(VMError::NativeCallFailed {
                name: name.to_string(),
                reason: format!("declared {} return but produced none", kind.as_str()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_registered_function() {
        let mut natives = NativeRegistry::new();
        natives.register(
            "math.add",
            &[ValueKind::Int, ValueKind::Int],
            Some(ValueKind::Int),
            |args| Ok(Some(Value::Int(args[0].as_i64()? + args[1].as_i64()?))),
        );

        assert!(natives.contains("math.add"));
        assert_eq!(natives.get("math.add").unwrap().params().len(), 2);
        let out = natives
            .invoke("math.add", &[Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(out, Some(Value::Int(5)));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let mut natives = NativeRegistry::new();
        assert!(matches!(
            natives.invoke("nope", &[]),
            Err(VMError::UnknownNativeFunction { name }) if name == "nope"
        ));
    }

    #[test]
    fn return_is_coerced_to_declared_kind() {
        let mut natives = NativeRegistry::new();
        natives.register("fmt", &[], Some(ValueKind::Text), |_| {
            Ok(Some(Value::Int(12)))
        });
        assert_eq!(
            natives.invoke("fmt", &[]).unwrap(),
            Some(Value::Text("12".into()))
        );
    }

    #[test]
    fn missing_declared_return_fails() {
        let mut natives = NativeRegistry::new();
        natives.register("f", &[], Some(ValueKind::Int), |_| Ok(None));
        assert!(matches!(
            natives.invoke("f", &[]),
            Err(VMError::NativeCallFailed { .. })
        ));
    }

    #[test]
    fn void_function_drops_result() {
        let mut natives = NativeRegistry::new();
        natives.register("v", &[], None, |_| Ok(Some(Value::Int(1))));
        assert_eq!(natives.invoke("v", &[]).unwrap(), None);
    }
}
