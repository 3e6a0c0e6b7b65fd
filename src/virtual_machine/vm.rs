//! Core virtual machine implementation.
//!
//! The [`Engine`] is a fetch-decode-execute state machine over a byte
//! addressable [`Memory`]. One [`Engine::step`] executes exactly one
//! instruction. Arithmetic uses wrapping semantics to prevent overflow panics.
//!
//! Interrupts are dispatched re-entrantly: [`Engine::interrupt`] calls into
//! the registered handler and keeps stepping until the call depth is back to
//! its value at entry, so a handler's own subroutine calls never end the
//! dispatch early.

pub mod config;
pub mod memory;
pub mod native;
pub mod registers;
pub mod stack;
pub mod value;


use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::{debug, info, warn};
use std::collections::HashMap;

pub use config::EngineConfig;
pub use memory::{MappedMemory, Memory, Ram};
pub use native::NativeRegistry;
pub use registers::{Flag, Registers};
pub use stack::Stack;
pub use value::{Value, ValueKind};

/// Host port callback: `(data, is_read) -> data`.
pub type PortFn = Box<dyn FnMut(u64, bool) -> u64>;
/// Host hook invoked with the interrupt number on every accepted interrupt.
pub type InterruptObserver = Box<dyn FnMut(u8, &mut Registers)>;
/// Host hook invoked by `BREAKPOINT`.
pub type BreakpointHook = Box<dyn FnMut(&mut Registers)>;

macro_rules! exec_vm {
    // Entry point
    (
        vm = $vm:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident ( $( $field:ident : $kind:ident ),* $(,)? ) ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant => {
                    $( let $field = exec_vm!(@read $vm, $kind)?; )*
                    $vm.$handler($( $field ),*)
                }
            ),*
        }
    }};

    // Decode a register index
    (@read $vm:ident, Reg) => {{
        $vm.fetch_instr_u8().map(usize::from)
    }};

    // Decode an 8-bit immediate
    (@read $vm:ident, Imm8) => {{
        $vm.fetch_instr_u8()
    }};

    // Decode a 64-bit immediate (little-endian, 8 bytes)
    (@read $vm:ident, Imm64) => {{
        $vm.fetch_instr_i64()
    }};
}

/// The virtual machine.
///
/// Owns its memory, register file, stack and interrupt table. Ports, the
/// interrupt observer, the breakpoint hook and native functions are supplied
/// by the host and survive [`Engine::reset`].
pub struct Engine<M: Memory = Ram> {
    memory: M,
    registers: Registers,
    stack: Stack,
    int_handlers: HashMap<u8, u64>,
    ports: HashMap<u64, PortFn>,
    observer: Option<InterruptObserver>,
    breakpoint: Option<BreakpointHook>,
    natives: NativeRegistry,
    halted: bool,
    config: EngineConfig,
}

impl<M: Memory> Engine<M> {
    /// Creates an engine over `memory` with the default configuration.
    pub fn new(memory: M) -> Self {
        Self::with_config(memory, EngineConfig::default())
    }

    pub fn with_config(memory: M, config: EngineConfig) -> Self {
        let mut engine = Self {
            memory,
            registers: Registers::new(config.gp_registers),
            stack: Stack::with_limit(config.max_stack_depth),
            int_handlers: HashMap::new(),
            ports: HashMap::new(),
            observer: None,
            breakpoint: None,
            natives: NativeRegistry::new(),
            halted: false,
            config,
        };
        engine.reset();
        engine
    }

    /// Reinitializes registers, stack and interrupt table and clears Halted.
    ///
    /// Memory, ports and host hooks are left untouched.
    pub fn reset(&mut self) {
        self.registers = Registers::new(self.config.gp_registers);
        self.registers.set_interrupts_enabled(true);
        self.registers.set_privileged(self.config.start_privileged);
        self.stack = Stack::with_limit(self.config.max_stack_depth);
        self.int_handlers.clear();
        self.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// Registry consulted by `NATIVE_64`.
    pub fn natives_mut(&mut self) -> &mut NativeRegistry {
        &mut self.natives
    }

    /// Handler address registered for interrupt `num`.
    pub fn interrupt_handler(&self, num: u8) -> Option<u64> {
        self.int_handlers.get(&num).copied()
    }

    /// Registers `func` for `port`, replacing any previous callback.
    pub fn set_port(&mut self, port: u64, func: impl FnMut(u64, bool) -> u64 + 'static) {
        self.ports.insert(port, Box::new(func));
    }

    /// Removes the callback for `port`. Returns whether one was registered.
    pub fn remove_port(&mut self, port: u64) -> bool {
        self.ports.remove(&port).is_some()
    }

    pub fn set_interrupt_observer(&mut self, observer: impl FnMut(u8, &mut Registers) + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn set_breakpoint_hook(&mut self, hook: impl FnMut(&mut Registers) + 'static) {
        self.breakpoint = Some(Box::new(hook));
    }

    /// Executes one instruction and returns it.
    ///
    /// A halted engine does nothing and reports `NOP`. An unknown opcode or a
    /// privileged opcode without Privileged fails with IP left on the opcode
    /// byte and no other state touched.
    pub fn step(&mut self) -> Result<Instruction, VMError> {
        if self.halted {
            return Ok(Instruction::Nop);
        }

        let offset = self.registers.ip;
        let opcode = self.fetch_instr_u8()?;
        let instr = match Instruction::try_from(opcode) {
            Ok(instr) => instr,
            Err(_) => {
                self.registers.ip = offset;
                return Err(VMError::InvalidInstruction { opcode, offset });
            }
        };

        if instr.is_privileged() && !self.registers.privileged() {
            self.registers.ip = offset;
            return Err(VMError::PrivilegedInstruction {
                instruction: instr.mnemonic(),
                offset,
            });
        }

        if self.config.trace {
            debug!("{offset:08x}: {}", instr.mnemonic());
        }

        self.exec(instr)?;
        Ok(instr)
    }

    /// Steps until the engine halts. Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<u64, VMError> {
        self.run_for(u64::MAX)
    }

    /// Steps until the engine halts or `max_steps` instructions have run.
    pub fn run_for(&mut self, max_steps: u64) -> Result<u64, VMError> {
        let mut steps = 0;
        while !self.halted && steps < max_steps {
            self.step()?;
            steps += 1;
        }
        Ok(steps)
    }

    /// Raises interrupt `num`.
    ///
    /// Ignored while InterruptsEnabled is clear. Otherwise the machine runs
    /// privileged, the observer sees `num`, and a registered handler runs to
    /// its matching return. Privileged is restored afterwards and the machine
    /// is left running.
    pub fn interrupt(&mut self, num: u8) -> Result<(), VMError> {
        if !self.registers.interrupts_enabled() {
            return Ok(());
        }

        let was_privileged = self.registers.privileged();
        self.halted = false;
        self.registers.set_privileged(true);

        if let Some(observer) = self.observer.as_mut() {
            observer(num, &mut self.registers);
        }

        let result = match self.int_handlers.get(&num).copied() {
            Some(addr) => self.dispatch(num, addr),
            None => Ok(()),
        };

        self.registers.set_privileged(was_privileged);
        self.halted = false;
        result
    }

    fn dispatch(&mut self, num: u8, addr: u64) -> Result<(), VMError> {
        debug!("interrupt {num} -> {addr:#x}");
        let depth = self.registers.cd;
        self.call(addr)?;
        while self.registers.cd != depth {
            self.step()?;
            if self.halted {
                return Err(VMError::HaltedInInterrupt { number: num });
            }
        }
        Ok(())
    }

    // =========================
    // Fetch primitives
    // =========================

    fn fetch_instr_bytes<const N: usize>(&mut self) -> Result<[u8; N], VMError> {
        let mut buf = [0u8; N];
        self.memory.read_bytes(self.registers.ip, &mut buf)?;
        self.registers.ip = self.registers.ip.wrapping_add(N as u64);
        Ok(buf)
    }

    fn fetch_bytes<const N: usize>(&self, addr: u64) -> Result<[u8; N], VMError> {
        let mut buf = [0u8; N];
        self.memory.read_bytes(addr, &mut buf)?;
        Ok(buf)
    }

    pub fn fetch_instr_u8(&mut self) -> Result<u8, VMError> {
        Ok(self.fetch_instr_bytes::<1>()?[0])
    }

    pub fn fetch_instr_i8(&mut self) -> Result<i8, VMError> {
        self.fetch_instr_bytes().map(i8::from_le_bytes)
    }

    pub fn fetch_instr_i16(&mut self) -> Result<i16, VMError> {
        self.fetch_instr_bytes().map(i16::from_le_bytes)
    }

    pub fn fetch_instr_i32(&mut self) -> Result<i32, VMError> {
        self.fetch_instr_bytes().map(i32::from_le_bytes)
    }

    pub fn fetch_instr_i64(&mut self) -> Result<i64, VMError> {
        self.fetch_instr_bytes().map(i64::from_le_bytes)
    }

    /// Reads the length-prefixed string at IP and advances past it.
    pub fn fetch_instr_string(&mut self) -> Result<String, VMError> {
        let (s, size) = self.read_string(self.registers.ip)?;
        self.registers.ip = self.registers.ip.wrapping_add(size);
        Ok(s)
    }

    pub fn fetch_u8(&self, addr: u64) -> Result<u8, VMError> {
        self.memory.read_u8(addr)
    }

    pub fn fetch_i8(&self, addr: u64) -> Result<i8, VMError> {
        self.fetch_bytes(addr).map(i8::from_le_bytes)
    }

    pub fn fetch_i16(&self, addr: u64) -> Result<i16, VMError> {
        self.fetch_bytes(addr).map(i16::from_le_bytes)
    }

    pub fn fetch_i32(&self, addr: u64) -> Result<i32, VMError> {
        self.fetch_bytes(addr).map(i32::from_le_bytes)
    }

    pub fn fetch_i64(&self, addr: u64) -> Result<i64, VMError> {
        self.fetch_bytes(addr).map(i64::from_le_bytes)
    }

    /// Reads the length-prefixed string at `addr`.
    pub fn fetch_string(&self, addr: u64) -> Result<String, VMError> {
        self.read_string(addr).map(|(s, _)| s)
    }

    /// Decodes a string and returns it with its encoded size.
    fn read_string(&self, addr: u64) -> Result<(String, u64), VMError> {
        let len = u64::from(u32::from_le_bytes(self.fetch_bytes(addr)?));
        let body = addr.checked_add(4).ok_or(VMError::MemoryOutOfBounds {
            addr,
            len: self.memory.len(),
        })?;
        if body.checked_add(len).is_none_or(|end| end > self.memory.len()) {
            return Err(VMError::MemoryOutOfBounds {
                addr: body,
                len: self.memory.len(),
            });
        }

        let mut bytes = vec![0u8; len as usize];
        self.memory.read_bytes(body, &mut bytes)?;
        let s = String::from_utf8(bytes).map_err(|_| VMError::InvalidUtf8 { addr })?;
        Ok((s, 4 + len))
    }

    pub fn store_i8(&mut self, addr: u64, value: i8) -> Result<(), VMError> {
        self.memory.write_bytes(addr, &value.to_le_bytes())
    }

    pub fn store_i64(&mut self, addr: u64, value: i64) -> Result<(), VMError> {
        self.memory.write_bytes(addr, &value.to_le_bytes())
    }

    // =========================
    // Execution
    // =========================

    /// Executes a single decoded instruction.
    fn exec(&mut self, instruction: Instruction) -> Result<(), VMError> {
        exec_vm! {
            vm = self,
            instr = instruction,
            {
                // Machine control
                Nop => op_nop(),
                Halt => op_halt(),
                Reset => op_reset(),
                Breakpoint => op_breakpoint(),
                // Interrupts
                Int8 => op_int(num: Imm8),
                Shdlr => op_set_handler(num: Imm8, addr: Imm64),
                Cli => op_cli(),
                Sti => op_sti(),
                // Compare and branch
                CmpRR => op_cmp_rr(a: Reg, b: Reg),
                CmpR64 => op_cmp_r64(a: Reg, imm: Imm64),
                Jmp64 => op_jmp(addr: Imm64),
                JmpR => op_jmp_r(addr: Reg),
                Jeq64 => op_jeq(addr: Imm64),
                Jne64 => op_jne(addr: Imm64),
                Jle64 => op_jle(addr: Imm64),
                Jge64 => op_jge(addr: Imm64),
                Jl64 => op_jl(addr: Imm64),
                Jg64 => op_jg(addr: Imm64),
                // Integer arithmetic
                AddRR => op_add_rr(a: Reg, b: Reg),
                AddR64 => op_add_r64(a: Reg, imm: Imm64),
                SubRR => op_sub_rr(a: Reg, b: Reg),
                SubR64 => op_sub_r64(a: Reg, imm: Imm64),
                // Data movement
                MovR64 => op_mov_r64(dst: Reg, imm: Imm64),
                MovRR => op_mov_rr(dst: Reg, src: Reg),
                Read8RR => op_read8(dst: Reg, addr: Reg),
                Read32RR => op_read32(dst: Reg, addr: Reg),
                // Ports
                Out6464 => op_out_imm(port: Imm64, data: Imm64),
                Out64R => op_out_reg(port: Imm64, data: Reg),
                InR64 => op_in(dst: Reg, port: Imm64),
                // Stack
                Push64 => op_push(imm: Imm64),
                PushR => op_push_r(src: Reg),
                Pop => op_pop(),
                PopR => op_pop_r(dst: Reg),
                // Calls
                Call64 => op_call(addr: Imm64),
                CallR => op_call_r(addr: Reg),
                Ret => op_ret(),
                // Privilege
                NonPriv => op_nonpriv(),
                PrivTest => op_nop(),
                PrintPriv => op_print_priv(),
                // Host boundary
                PushS64 => op_pushs(addr: Imm64),
                Native64 => op_native(name: Imm64),
            }
        }
    }

    fn reg(&self, idx: usize) -> Result<i64, VMError> {
        self.registers.gp(idx)
    }

    fn jump_if(&mut self, addr: i64, cond: bool) -> Result<(), VMError> {
        if cond {
            self.registers.ip = addr as u64;
        }
        Ok(())
    }

    fn call(&mut self, addr: u64) -> Result<(), VMError> {
        self.stack.push(self.registers.ip)?;
        self.registers.cd += 1;
        self.registers.ip = addr;
        Ok(())
    }

    fn out(&mut self, port: u64, data: u64) {
        if let Some(func) = self.ports.get_mut(&port) {
            func(data, false);
        }
    }

    fn op_nop(&mut self) -> Result<(), VMError> {
        Ok(())
    }

    fn op_halt(&mut self) -> Result<(), VMError> {
        self.halted = true;
        Ok(())
    }

    fn op_reset(&mut self) -> Result<(), VMError> {
        self.reset();
        Ok(())
    }

    fn op_breakpoint(&mut self) -> Result<(), VMError> {
        match self.breakpoint.as_mut() {
            Some(hook) => hook(&mut self.registers),
            None => warn!("breakpoint at {:#x} with no hook installed", self.registers.ip.wrapping_sub(1)),
        }
        Ok(())
    }

    fn op_int(&mut self, num: u8) -> Result<(), VMError> {
        self.interrupt(num)
    }

    fn op_set_handler(&mut self, num: u8, addr: i64) -> Result<(), VMError> {
        self.int_handlers.insert(num, addr as u64);
        Ok(())
    }

    fn op_cli(&mut self) -> Result<(), VMError> {
        self.registers.set_interrupts_enabled(false);
        Ok(())
    }

    fn op_sti(&mut self) -> Result<(), VMError> {
        self.registers.set_interrupts_enabled(true);
        Ok(())
    }

    fn op_cmp_rr(&mut self, a: usize, b: usize) -> Result<(), VMError> {
        let (va, vb) = (self.reg(a)?, self.reg(b)?);
        self.registers.compare(va, vb);
        Ok(())
    }

    fn op_cmp_r64(&mut self, a: usize, imm: i64) -> Result<(), VMError> {
        let va = self.reg(a)?;
        self.registers.compare(va, imm);
        Ok(())
    }

    fn op_jmp(&mut self, addr: i64) -> Result<(), VMError> {
        self.jump_if(addr, true)
    }

    fn op_jmp_r(&mut self, addr: usize) -> Result<(), VMError> {
        let target = self.reg(addr)?;
        self.jump_if(target, true)
    }

    fn op_jeq(&mut self, addr: i64) -> Result<(), VMError> {
        self.jump_if(addr, self.registers.equal())
    }

    fn op_jne(&mut self, addr: i64) -> Result<(), VMError> {
        self.jump_if(addr, !self.registers.equal())
    }

    fn op_jle(&mut self, addr: i64) -> Result<(), VMError> {
        self.jump_if(addr, self.registers.lesser() || self.registers.equal())
    }

    fn op_jge(&mut self, addr: i64) -> Result<(), VMError> {
        self.jump_if(addr, self.registers.greater() || self.registers.equal())
    }

    fn op_jl(&mut self, addr: i64) -> Result<(), VMError> {
        self.jump_if(addr, self.registers.lesser())
    }

    fn op_jg(&mut self, addr: i64) -> Result<(), VMError> {
        self.jump_if(addr, self.registers.greater())
    }

    fn op_add_rr(&mut self, a: usize, b: usize) -> Result<(), VMError> {
        let v = self.reg(a)?.wrapping_add(self.reg(b)?);
        self.registers.set_gp(a, v)
    }

    fn op_add_r64(&mut self, a: usize, imm: i64) -> Result<(), VMError> {
        let v = self.reg(a)?.wrapping_add(imm);
        self.registers.set_gp(a, v)
    }

    fn op_sub_rr(&mut self, a: usize, b: usize) -> Result<(), VMError> {
        let v = self.reg(a)?.wrapping_sub(self.reg(b)?);
        self.registers.set_gp(a, v)
    }

    fn op_sub_r64(&mut self, a: usize, imm: i64) -> Result<(), VMError> {
        let v = self.reg(a)?.wrapping_sub(imm);
        self.registers.set_gp(a, v)
    }

    fn op_mov_r64(&mut self, dst: usize, imm: i64) -> Result<(), VMError> {
        self.registers.set_gp(dst, imm)
    }

    fn op_mov_rr(&mut self, dst: usize, src: usize) -> Result<(), VMError> {
        let v = self.reg(src)?;
        self.registers.set_gp(dst, v)
    }

    fn op_read8(&mut self, dst: usize, addr: usize) -> Result<(), VMError> {
        let v = self.fetch_u8(self.reg(addr)? as u64)?;
        self.registers.set_gp(dst, i64::from(v))
    }

    fn op_read32(&mut self, dst: usize, addr: usize) -> Result<(), VMError> {
        let v = self.fetch_i32(self.reg(addr)? as u64)?;
        self.registers.set_gp(dst, i64::from(v))
    }

    fn op_out_imm(&mut self, port: i64, data: i64) -> Result<(), VMError> {
        self.out(port as u64, data as u64);
        Ok(())
    }

    fn op_out_reg(&mut self, port: i64, data: usize) -> Result<(), VMError> {
        let v = self.reg(data)?;
        self.out(port as u64, v as u64);
        Ok(())
    }

    fn op_in(&mut self, dst: usize, port: i64) -> Result<(), VMError> {
        // Validate before the callback so a bad register never consumes input.
        self.reg(dst)?;
        let v = match self.ports.get_mut(&(port as u64)) {
            Some(func) => func(0, true),
            None => 0,
        };
        self.registers.set_gp(dst, v as i64)
    }

    fn op_push(&mut self, imm: i64) -> Result<(), VMError> {
        self.stack.push(imm)
    }

    fn op_push_r(&mut self, src: usize) -> Result<(), VMError> {
        let v = self.reg(src)?;
        self.stack.push(v)
    }

    fn op_pop(&mut self) -> Result<(), VMError> {
        self.stack.pop().map(drop)
    }

    fn op_pop_r(&mut self, dst: usize) -> Result<(), VMError> {
        self.reg(dst)?;
        let v = self.stack.pop_as::<i64>()?;
        self.registers.set_gp(dst, v)
    }

    fn op_call(&mut self, addr: i64) -> Result<(), VMError> {
        self.call(addr as u64)
    }

    fn op_call_r(&mut self, addr: usize) -> Result<(), VMError> {
        let target = self.reg(addr)?;
        self.call(target as u64)
    }

    fn op_ret(&mut self) -> Result<(), VMError> {
        if self.registers.cd == 0 {
            return Err(VMError::ReturnWithoutCall);
        }
        let addr = self.stack.pop_as::<u64>()?;
        self.registers.cd -= 1;
        self.registers.ip = addr;
        Ok(())
    }

    fn op_nonpriv(&mut self) -> Result<(), VMError> {
        self.registers.set_privileged(false);
        Ok(())
    }

    fn op_print_priv(&mut self) -> Result<(), VMError> {
        if self.registers.privileged() {
            info!("Privileged");
        } else {
            info!("Protected");
        }
        Ok(())
    }

    fn op_pushs(&mut self, addr: i64) -> Result<(), VMError> {
        let s = self.fetch_string(addr as u64)?;
        self.stack.push(s)
    }

    /// Calls the native function named by the string at `name`.
    ///
    /// Arguments are popped per declared parameter, last parameter on top.
    fn op_native(&mut self, name: i64) -> Result<(), VMError> {
        let name = self.fetch_string(name as u64)?;
        let params = self
            .natives
            .get(&name)
            .map(|f| f.params().to_vec())
            .ok_or_else(|| VMError::UnknownNativeFunction { name: name.clone() })?;

        if self.stack.len() < params.len() {
            return Err(VMError::StackUnderflow {
                depth: params.len(),
                len: self.stack.len(),
            });
        }

        let mut args = Vec::with_capacity(params.len());
        for kind in params.iter().rev() {
            args.push(self.stack.pop()?.coerce(*kind)?);
        }
        args.reverse();

        if let Some(ret) = self.natives.invoke(&name, &args)? {
            self.stack.push(ret)?;
        }
        Ok(())
    }
}
