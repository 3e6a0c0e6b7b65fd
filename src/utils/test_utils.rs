//! Test utilities for engine testing.

use crate::virtual_machine::assembler::assemble_source;
use crate::virtual_machine::vm::{Engine, EngineConfig, Ram};

/// Memory size used by engines built from assembly in tests.
pub const TEST_MEMORY: usize = 4096;

/// Assembles `source` and loads it at address 0 of a zero-padded [`Ram`].
pub fn load_with(source: &str, config: EngineConfig) -> Engine {
    let program = assemble_source(source).expect("assembly failed");
    Engine::with_config(Ram::from_program(program.bytes(), TEST_MEMORY), config)
}

/// Unprivileged engine loaded with `source`.
pub fn load(source: &str) -> Engine {
    load_with(source, EngineConfig::default())
}

/// Privileged engine loaded with `source`.
pub fn load_privileged(source: &str) -> Engine {
    load_with(
        source,
        EngineConfig {
            start_privileged: true,
            ..EngineConfig::default()
        },
    )
}

/// Runs `engine` to HALT, bounded so a broken program fails instead of spinning.
pub fn run_to_halt(engine: &mut Engine) {
    engine.run_for(100_000).expect("engine run failed");
    assert!(engine.is_halted(), "program did not halt");
}

/// Assembles, loads and runs `source` unprivileged.
pub fn run_engine(source: &str) -> Engine {
    let mut engine = load(source);
    run_to_halt(&mut engine);
    engine
}

/// Assembles, loads and runs `source` privileged.
pub fn run_engine_privileged(source: &str) -> Engine {
    let mut engine = load_privileged(source);
    run_to_halt(&mut engine);
    engine
}
