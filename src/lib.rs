//! E64 library.
//!
//! Provides a 64-bit register virtual machine, its assembler and disassembler.

pub mod utils;
pub mod virtual_machine;
