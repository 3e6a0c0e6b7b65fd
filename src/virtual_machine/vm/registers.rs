use crate::virtual_machine::errors::VMError;

/// Number of addressable bits in the control word.
pub const CONTROL_WORD_BITS: u32 = u64::BITS;

/// Named control flags and their bit positions in the control word.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flag {
    Privileged = 0,
    Equal = 1,
    Lesser = 2,
    Greater = 3,
    InterruptsEnabled = 4,
}

impl Flag {
    pub const fn bit(self) -> u32 {
        self as u32
    }
}

/// Register file of the engine.
///
/// Holds the general purpose registers, the instruction pointer, the control
/// word and the call depth counter. Flags live as bits of `cr` so the host can
/// snapshot and restore them as one word.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Registers {
    gp: Vec<i64>,
    /// Instruction pointer, always the next unread opcode byte.
    pub ip: u64,
    /// Control word.
    pub cr: u64,
    /// Call depth: incremented by calls, decremented by returns.
    pub cd: u64,
}

impl Registers {
    /// Creates a register file with `count` general purpose registers.
    pub fn new(count: usize) -> Self {
        Self {
            gp: vec![0; count],
            ip: 0,
            cr: 0,
            cd: 0,
        }
    }

    /// Number of general purpose registers.
    pub fn gp_count(&self) -> usize {
        self.gp.len()
    }

    /// All general purpose registers, in index order.
    pub fn gp_slice(&self) -> &[i64] {
        &self.gp
    }

    /// Returns the value in register `idx`.
    ///
    /// Returns [`VMError::InvalidRegisterIndex`] if `idx` is out of bounds.
    pub fn gp(&self, idx: usize) -> Result<i64, VMError> {
        self.gp
            .get(idx)
            .copied()
            .ok_or(VMError::InvalidRegisterIndex {
                index: idx,
                available: self.gp.len(),
            })
    }

    /// Stores a value into register `idx`.
    ///
    /// Returns [`VMError::InvalidRegisterIndex`] if `idx` is out of bounds.
    pub fn set_gp(&mut self, idx: usize, v: i64) -> Result<(), VMError> {
        let available = self.gp.len();
        let slot = self
            .gp
            .get_mut(idx)
            .ok_or(VMError::InvalidRegisterIndex {
                index: idx,
                available,
            })?;
        *slot = v;
        Ok(())
    }

    /// Tests bit `bit` of the control word.
    pub fn flag_bit(&self, bit: u32) -> Result<bool, VMError> {
        if bit >= CONTROL_WORD_BITS {
            return Err(VMError::InvalidFlagBit { bit });
        }
        Ok((self.cr >> bit) & 1 == 1)
    }

    /// Sets or clears bit `bit` of the control word.
    pub fn set_flag_bit(&mut self, bit: u32, value: bool) -> Result<(), VMError> {
        if bit >= CONTROL_WORD_BITS {
            return Err(VMError::InvalidFlagBit { bit });
        }
        if value {
            self.cr |= 1u64 << bit;
        } else {
            self.cr &= !(1u64 << bit);
        }
        Ok(())
    }

    pub fn flag(&self, flag: Flag) -> bool {
        (self.cr >> flag.bit()) & 1 == 1
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        if value {
            self.cr |= 1u64 << flag.bit();
        } else {
            self.cr &= !(1u64 << flag.bit());
        }
    }

    pub fn privileged(&self) -> bool {
        self.flag(Flag::Privileged)
    }

    pub fn set_privileged(&mut self, value: bool) {
        self.set_flag(Flag::Privileged, value)
    }

    pub fn equal(&self) -> bool {
        self.flag(Flag::Equal)
    }

    pub fn lesser(&self) -> bool {
        self.flag(Flag::Lesser)
    }

    pub fn greater(&self) -> bool {
        self.flag(Flag::Greater)
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.flag(Flag::InterruptsEnabled)
    }

    pub fn set_interrupts_enabled(&mut self, value: bool) {
        self.set_flag(Flag::InterruptsEnabled, value)
    }

    /// Sets Lesser, Greater and Equal from a signed comparison of `a` and `b`.
    pub fn compare(&mut self, a: i64, b: i64) {
        self.set_flag(Flag::Lesser, a < b);
        self.set_flag(Flag::Greater, a > b);
        self.set_flag(Flag::Equal, a == b);
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new(16)
    }
}
