//! Instruction Set Architecture (ISA) definitions.
//!
//! Defines the engine's instruction set. The [`for_each_instruction!`](crate::for_each_instruction)
//! macro holds the canonical instruction definitions and invokes a callback macro for code
//! generation. The engine dispatcher, the assembler mnemonic lookup, the disassembler and
//! the ISA fingerprint test all expand from the same table.
//!
//! This module generates:
//! - The [`Instruction`] enum with opcode mappings
//! - `TryFrom<u8>` for decoding opcodes
//! - Mnemonic lookup, operand layout and privilege queries
//!
//! # Bytecode Format
//!
//! Instructions use fixed per-opcode layouts:
//! - Opcode: 1 byte (0 is never a valid opcode)
//! - `Reg` operand: 1 byte (general purpose register index)
//! - `Imm8` operand: 1 byte
//! - `Imm64` operand: 8 bytes (little-endian)

use crate::virtual_machine::errors::VMError;

/// Invokes a callback macro with the complete instruction definition list.
///
/// Each entry reads `Name = opcode, "MNEMONIC" => [operands], privileged`.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Machine control
            // =========================
            /// NOP ; does nothing
            Nop = 0x01, "NOP" => [], false,
            /// HALT ; stops execution until an interrupt or reset
            Halt = 0x02, "HALT" => [], false,
            /// RESET ; reinitializes registers, stack and interrupt table
            Reset = 0x03, "RESET" => [], false,
            /// BREAKPOINT ; hands control to the host breakpoint hook
            Breakpoint = 0x04, "BREAKPOINT" => [], false,
            // =========================
            // Interrupts
            // =========================
            /// INT_8 n ; raises interrupt n
            Int8 = 0x05, "INT_8" => [num: Imm8], false,
            /// SHDLR n, addr ; installs the handler at addr for interrupt n
            Shdlr = 0x06, "SHDLR" => [num: Imm8, addr: Imm64], true,
            /// CLI ; disables interrupts
            Cli = 0x07, "CLI" => [], false,
            /// STI ; enables interrupts
            Sti = 0x08, "STI" => [], false,
            // =========================
            // Compare and branch
            // =========================
            /// CMP_R_R ra, rb ; sets Equal/Lesser/Greater from ra <=> rb
            CmpRR = 0x09, "CMP_R_R" => [a: Reg, b: Reg], false,
            /// CMP_R_64 ra, imm ; sets Equal/Lesser/Greater from ra <=> imm
            CmpR64 = 0x0A, "CMP_R_64" => [a: Reg, imm: Imm64], false,
            /// JMP_64 addr ; ip = addr
            Jmp64 = 0x0B, "JMP_64" => [addr: Imm64], false,
            /// JMP_R ra ; ip = ra
            JmpR = 0x0C, "JMP_R" => [addr: Reg], false,
            /// JEQ_64 addr ; jumps if Equal
            Jeq64 = 0x0D, "JEQ_64" => [addr: Imm64], false,
            /// JNE_64 addr ; jumps if not Equal
            Jne64 = 0x0E, "JNE_64" => [addr: Imm64], false,
            /// JLE_64 addr ; jumps if Lesser or Equal
            Jle64 = 0x0F, "JLE_64" => [addr: Imm64], false,
            /// JGE_64 addr ; jumps if Greater or Equal
            Jge64 = 0x10, "JGE_64" => [addr: Imm64], false,
            /// JL_64 addr ; jumps if Lesser
            Jl64 = 0x11, "JL_64" => [addr: Imm64], false,
            /// JG_64 addr ; jumps if Greater
            Jg64 = 0x12, "JG_64" => [addr: Imm64], false,
            // =========================
            // Integer arithmetic
            // =========================
            /// ADD_R_R ra, rb ; ra = ra + rb
            AddRR = 0x13, "ADD_R_R" => [a: Reg, b: Reg], false,
            /// ADD_R_64 ra, imm ; ra = ra + imm
            AddR64 = 0x14, "ADD_R_64" => [a: Reg, imm: Imm64], false,
            /// SUB_R_R ra, rb ; ra = ra - rb
            SubRR = 0x15, "SUB_R_R" => [a: Reg, b: Reg], false,
            /// SUB_R_64 ra, imm ; ra = ra - imm
            SubR64 = 0x16, "SUB_R_64" => [a: Reg, imm: Imm64], false,
            // =========================
            // Moves / memory
            // =========================
            /// MOV_R_64 rd, imm ; rd = imm
            MovR64 = 0x17, "MOV_R_64" => [dst: Reg, imm: Imm64], false,
            /// MOV_R_R rd, rs ; rd = rs
            MovRR = 0x18, "MOV_R_R" => [dst: Reg, src: Reg], false,
            /// READ8_R_R rd, ra ; rd = mem8[ra]
            Read8RR = 0x19, "READ8_R_R" => [dst: Reg, addr: Reg], false,
            /// READ32_R_R rd, ra ; rd = sign_extend(mem32[ra])
            Read32RR = 0x1A, "READ32_R_R" => [dst: Reg, addr: Reg], false,
            // =========================
            // Ports
            // =========================
            /// OUT_64_64 port, imm ; writes imm to port
            Out6464 = 0x1B, "OUT_64_64" => [port: Imm64, data: Imm64], true,
            /// OUT_64_R port, rs ; writes rs to port
            Out64R = 0x1C, "OUT_64_R" => [port: Imm64, data: Reg], true,
            /// IN_R_64 rd, port ; rd = read from port
            InR64 = 0x1D, "IN_R_64" => [dst: Reg, port: Imm64], true,
            // =========================
            // Stack and calls
            // =========================
            /// PUSH_64 imm ; pushes imm
            Push64 = 0x1E, "PUSH_64" => [imm: Imm64], false,
            /// PUSH_R rs ; pushes rs
            PushR = 0x1F, "PUSH_R" => [src: Reg], false,
            /// POP ; discards the top of the stack
            Pop = 0x20, "POP" => [], false,
            /// POP_R rd ; rd = pop
            PopR = 0x21, "POP_R" => [dst: Reg], false,
            /// CALL_64 addr ; pushes ip and jumps to addr
            Call64 = 0x22, "CALL_64" => [addr: Imm64], false,
            /// CALL_R ra ; pushes ip and jumps to ra
            CallR = 0x23, "CALL_R" => [addr: Reg], false,
            /// RET ; pops the return address and jumps to it
            Ret = 0x24, "RET" => [], false,
            // =========================
            // Privilege
            // =========================
            /// NONPRIV ; drops to the non privileged execution level
            NonPriv = 0x25, "NONPRIV" => [], false,
            /// PRIVTEST ; no-op that only runs in privileged mode
            PrivTest = 0x26, "PRIVTEST" => [], true,
            /// PRINT_PRIV ; logs the current execution level
            PrintPriv = 0x27, "PRINT_PRIV" => [], false,
            // =========================
            // Native calls
            // =========================
            /// PUSHS_64 addr ; pushes the string stored at addr
            PushS64 = 0x28, "PUSHS_64" => [addr: Imm64], false,
            /// NATIVE_64 addr ; calls the host function named by the string at addr
            Native64 = 0x29, "NATIVE_64" => [name: Imm64], false,
        }
    };
}

/// Operand encoding kinds used by the instruction table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandKind {
    /// General purpose register index, 1 byte.
    Reg,
    /// Unsigned immediate, 1 byte.
    Imm8,
    /// Signed immediate, 8 bytes little-endian.
    Imm64,
}

impl OperandKind {
    /// Encoded width in bytes.
    pub const fn size(&self) -> usize {
        match self {
            OperandKind::Reg | OperandKind::Imm8 => 1,
            OperandKind::Imm64 => 8,
        }
    }
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ], $privileged:expr
        ),* $(,)?
    ) => {
        // =========================
        // Engine instruction enum
        // =========================
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::InvalidInstruction {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl Instruction {
            /// Every instruction in opcode order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Returns true if this instruction only runs while Privileged is set.
            pub const fn is_privileged(&self) -> bool {
                match self {
                    $( Instruction::$name => $privileged, )*
                }
            }

            /// Operand layout following the opcode byte.
            pub const fn operands(&self) -> &'static [OperandKind] {
                match self {
                    $( Instruction::$name => &[ $( OperandKind::$kind ),* ], )*
                }
            }

            /// Number of operand bytes following the opcode byte.
            pub const fn operand_size(&self) -> usize {
                match self {
                    $( Instruction::$name => 0usize $( + OperandKind::$kind.size() )*, )*
                }
            }

            /// Looks up an instruction by its exact mnemonic.
            pub fn from_mnemonic(name: &str) -> Option<Instruction> {
                match name {
                    $( $mnemonic => Some(Instruction::$name), )*
                    _ => None,
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_try_from_invalid() {
        assert!(matches!(
            Instruction::try_from(0x00),
            Err(VMError::InvalidInstruction { opcode: 0x00, .. })
        ));
        assert!(matches!(
            Instruction::try_from(0xFF),
            Err(VMError::InvalidInstruction { opcode: 0xFF, .. })
        ));
    }

    #[test]
    fn opcodes_round_trip_through_byte() {
        for instr in Instruction::ALL {
            assert_eq!(Instruction::try_from(*instr as u8).unwrap(), *instr);
        }
    }

    #[test]
    fn opcodes_are_dense_from_one() {
        for (i, instr) in Instruction::ALL.iter().enumerate() {
            assert_eq!(*instr as usize, i + 1);
        }
    }

    #[test]
    fn mnemonic_lookup() {
        assert_eq!(Instruction::from_mnemonic("MOV_R_64"), Some(Instruction::MovR64));
        assert_eq!(Instruction::from_mnemonic("HALT"), Some(Instruction::Halt));
        assert_eq!(Instruction::from_mnemonic("halt"), None);
        assert_eq!(Instruction::from_mnemonic("FOO"), None);
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(Instruction::Nop.operand_size(), 0);
        assert_eq!(Instruction::Int8.operand_size(), 1);
        assert_eq!(Instruction::Shdlr.operand_size(), 9);
        assert_eq!(Instruction::AddRR.operand_size(), 2);
        assert_eq!(Instruction::MovR64.operand_size(), 9);
        assert_eq!(Instruction::Out6464.operand_size(), 16);
    }

    #[test]
    fn privileged_set() {
        let privileged: Vec<_> = Instruction::ALL
            .iter()
            .filter(|i| i.is_privileged())
            .copied()
            .collect();
        assert_eq!(
            privileged,
            vec![
                Instruction::Shdlr,
                Instruction::Out6464,
                Instruction::Out64R,
                Instruction::InR64,
                Instruction::PrivTest,
            ]
        );
    }
}
