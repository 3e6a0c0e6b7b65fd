//! 64-bit register virtual machine and its assembler.
//!
//! # Architecture
//!
//! - **Registers**: signed 64-bit general purpose registers (16 by default),
//!   an instruction pointer, a control word holding the flags as bits and a
//!   call depth counter
//! - **Memory**: flat byte-addressable store, optionally fronted by host hooks
//! - **Stack**: LIFO of tagged values used for return addresses and for
//!   marshalling native call arguments
//! - **Instruction format**: one opcode byte followed by a fixed operand layout
//! - **Privilege**: a fixed set of opcodes runs only while Privileged is set;
//!   interrupts run their handlers privileged
//!
//! # Modules
//!
//! - [`assembler`]: Two-pass assembler with label resolution and data interning
//! - [`errors`]: Assembly and execution error types
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`literal`]: Typed literal grammar and encoding
//! - [`program`]: Program image and disassembler
//! - [`tokenizer`]: Source lexer
//! - [`vm`]: The execution engine

pub mod assembler;
pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod literal;
pub mod program;
pub mod tokenizer;
pub mod vm;
