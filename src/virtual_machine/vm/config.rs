use crate::virtual_machine::errors::VMError;
use std::env;

/// Default number of general purpose registers.
pub const DEFAULT_GP_REGISTERS: usize = 16;

/// Construction parameters of an [`Engine`](crate::virtual_machine::vm::Engine).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    /// Size of the general purpose register file (at most 256 are addressable).
    pub gp_registers: usize,
    /// Whether Privileged is set after a reset.
    pub start_privileged: bool,
    /// Log every executed instruction at debug level.
    pub trace: bool,
    /// Maximum number of stack values, `None` for unbounded.
    pub max_stack_depth: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gp_registers: DEFAULT_GP_REGISTERS,
            start_privileged: false,
            trace: false,
            max_stack_depth: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `E64_GP_REGISTERS`, `E64_PRIVILEGED`, `E64_TRACE`
    /// and `E64_MAX_STACK` when set.
    pub fn from_env() -> Result<Self, VMError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, VMError> {
        let mut config = Self::default();

        if let Some(v) = lookup("E64_GP_REGISTERS") {
            config.gp_registers = parse_registers("E64_GP_REGISTERS", &v)?;
        }
        if let Some(v) = lookup("E64_PRIVILEGED") {
            config.start_privileged = parse_bool("E64_PRIVILEGED", &v)?;
        }
        if let Some(v) = lookup("E64_TRACE") {
            config.trace = parse_bool("E64_TRACE", &v)?;
        }
        if let Some(v) = lookup("E64_MAX_STACK") {
            let depth = v.trim().parse::<usize>().map_err(|_| VMError::InvalidConfig {
                key: "E64_MAX_STACK",
                value: v.clone(),
            })?;
            config.max_stack_depth = Some(depth);
        }

        Ok(config)
    }
}

/// Parses a register file size; register indices are single bytes.
pub fn parse_registers(key: &'static str, value: &str) -> Result<usize, VMError> {
    match value.trim().parse::<usize>() {
        Ok(n) if (1..=256).contains(&n) => Ok(n),
        _ => Err(VMError::InvalidConfig {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, VMError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(VMError::InvalidConfig {
            key,
            value: value.to_string(),
        }),
    }
}
