//! The Architecture: an 8-register, 32,768-cell stack machine with
//! suspend-on-input semantics.

use std::collections::VecDeque;

use crate::error::VmError;
use crate::memory::{Memory, OperandRef, REGISTER_COUNT};
use crate::opcode::{Opcode, OperandKind};

/// Everything a `step` call can have done, rich enough for the execution
/// tracer and the stack tracer to render a row without re-decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEvent {
    pub ip_before: u16,
    pub opcode: Opcode,
    pub output: Option<u8>,
    pub effect: StepEffect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEffect {
    None,
    Halted,
    /// `detail` is a free-form rendering of the operation that produced
    /// `new` (e.g. `"5 + 7"`, `"!5"`, `"mem[10]"`), for the execution
    /// tracer; `None` where the new value isn't derived from an
    /// expression worth narrating (`set`, `pop`, `in`).
    RegisterSet {
        register: u8,
        old: u16,
        new: u16,
        detail: Option<String>,
    },
    Pushed(u16),
    Popped { register: u8, value: u16 },
    Wrote { address: u16, old: u16, new: u16 },
    Jumped { target: u16 },
    Branch { taken: bool, compared: u16, target: u16 },
    Called { target: u16, return_addr: u16 },
    Returned { target: u16 },
    Output(u8),
    Input { register: u8, value: u8 },
}

/// Whether the caller (the Driver's pump loop) should stop stepping before
/// the next instruction executes. Used to implement breakpoints without
/// coupling the VM to the Debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    Pause,
}

#[derive(Debug, Clone)]
pub struct Vm {
    pub registers: [u16; REGISTER_COUNT as usize],
    pub stack: Vec<u16>,
    pub memory: Memory,
    pub ip: u16,
    pub halted: bool,
    pub input: VecDeque<u8>,
}

impl Vm {
    pub fn new(memory: Memory) -> Self {
        Self {
            registers: [0; REGISTER_COUNT as usize],
            stack: Vec::new(),
            memory,
            ip: 0,
            halted: false,
            input: VecDeque::new(),
        }
    }

    /// Queue bytes (typically a user line plus `\n`) for future `in`
    /// instructions to consume.
    pub fn feed_input(&mut self, bytes: impl IntoIterator<Item = u8>) {
        self.input.extend(bytes);
    }

    /// Decode the opcode at `ip` without executing it, for breakpoint
    /// classification and tracer lookahead. `None` means an invalid
    /// opcode sits there, or `ip` itself is out of range.
    pub fn peek_opcode(&self) -> Option<Opcode> {
        self.memory.raw(self.ip).ok().and_then(Opcode::decode)
    }

    /// True when `run_until_input*` would suspend right now: the next
    /// instruction is `in` and the input buffer is empty.
    pub fn blocked_on_input(&self) -> bool {
        matches!(self.peek_opcode(), Some(Opcode::In)) && self.input.is_empty()
    }

    fn resolve_value(&self, operand: OperandRef) -> u16 {
        match operand {
            OperandRef::Literal(v) => v,
            OperandRef::Register(r) => self.registers[r as usize],
        }
    }

    /// `wrapping_add` rather than plain `+`: `instruction_addr` can be set
    /// to any `u16` (e.g. via the debugger's `ip` command), and operand
    /// addresses that would overflow still need to surface as a VmError
    /// rather than panic on the addition itself.
    fn operand_addr(instruction_addr: u16, operand_index: u8) -> u16 {
        instruction_addr
            .wrapping_add(1)
            .wrapping_add(operand_index as u16)
    }

    fn fetch_value(&self, instruction_addr: u16, operand_index: u8) -> Result<u16, VmError> {
        let addr = Self::operand_addr(instruction_addr, operand_index);
        let operand = self
            .memory
            .decode_operand_word(instruction_addr, operand_index, addr)?;
        Ok(self.resolve_value(operand))
    }

    fn fetch_store(&self, instruction_addr: u16, operand_index: u8) -> Result<u8, VmError> {
        let addr = Self::operand_addr(instruction_addr, operand_index);
        self.memory
            .decode_store_word(instruction_addr, operand_index, addr)
    }

    fn push(&mut self, value: u16) {
        self.stack.push(value);
    }

    fn pop(&mut self, address: u16) -> Result<u16, VmError> {
        self.stack
            .pop()
            .ok_or(VmError::StackUnderflow { address })
    }

    /// Execute the instruction at `ip`. Advances `ip` according to the
    /// opcode's control-flow rules and returns a description of what
    /// happened. A no-op on a halted VM is not valid — callers must check
    /// `halted` first (the pump loop in `run_until_input` does this).
    pub fn step(&mut self) -> Result<StepEvent, VmError> {
        let ip = self.ip;
        let word = self.memory.raw(ip)?;
        let opcode = Opcode::decode(word).ok_or(VmError::InvalidOpcode { address: ip, word })?;
        let kinds = opcode.operand_kinds();

        let mut output = None;
        let effect;

        match opcode {
            Opcode::Halt => {
                self.halted = true;
                effect = StepEffect::Halted;
            }
            Opcode::Set => {
                let reg = self.fetch_store(ip, 0)?;
                let value = self.fetch_value(ip, 1)?;
                let old = self.registers[reg as usize];
                self.registers[reg as usize] = value;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new: value,
                    detail: None,
                };
            }
            Opcode::Push => {
                let value = self.fetch_value(ip, 0)?;
                self.push(value);
                effect = StepEffect::Pushed(value);
            }
            Opcode::Pop => {
                let reg = self.fetch_store(ip, 0)?;
                let value = self.pop(ip)?;
                self.registers[reg as usize] = value;
                effect = StepEffect::Popped {
                    register: reg,
                    value,
                };
            }
            Opcode::Eq => {
                let reg = self.fetch_store(ip, 0)?;
                let b = self.fetch_value(ip, 1)?;
                let c = self.fetch_value(ip, 2)?;
                let old = self.registers[reg as usize];
                let new = u16::from(b == c);
                self.registers[reg as usize] = new;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new,
                    detail: Some(format!("{b} == {c}")),
                };
            }
            Opcode::Gt => {
                let reg = self.fetch_store(ip, 0)?;
                let b = self.fetch_value(ip, 1)?;
                let c = self.fetch_value(ip, 2)?;
                let old = self.registers[reg as usize];
                let new = u16::from(b > c);
                self.registers[reg as usize] = new;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new,
                    detail: Some(format!("{b} > {c}")),
                };
            }
            Opcode::Jmp => {
                let target = self.fetch_value(ip, 0)?;
                self.ip = target;
                effect = StepEffect::Jumped { target };
                return Ok(StepEvent {
                    ip_before: ip,
                    opcode,
                    output,
                    effect,
                });
            }
            Opcode::Jt => {
                let b = self.fetch_value(ip, 0)?;
                let target = self.fetch_value(ip, 1)?;
                let taken = b != 0;
                self.ip = if taken { target } else { ip.wrapping_add(opcode.len()) };
                effect = StepEffect::Branch {
                    taken,
                    compared: b,
                    target,
                };
                return Ok(StepEvent {
                    ip_before: ip,
                    opcode,
                    output,
                    effect,
                });
            }
            Opcode::Jf => {
                let b = self.fetch_value(ip, 0)?;
                let target = self.fetch_value(ip, 1)?;
                let taken = b == 0;
                self.ip = if taken { target } else { ip.wrapping_add(opcode.len()) };
                effect = StepEffect::Branch {
                    taken,
                    compared: b,
                    target,
                };
                return Ok(StepEvent {
                    ip_before: ip,
                    opcode,
                    output,
                    effect,
                });
            }
            Opcode::Add => {
                let reg = self.fetch_store(ip, 0)?;
                let b = self.fetch_value(ip, 1)? as u32;
                let c = self.fetch_value(ip, 2)? as u32;
                let old = self.registers[reg as usize];
                let new = ((b + c) % 32768) as u16;
                self.registers[reg as usize] = new;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new,
                    detail: Some(format!("{b} + {c}")),
                };
            }
            Opcode::Mult => {
                let reg = self.fetch_store(ip, 0)?;
                let b = self.fetch_value(ip, 1)? as u32;
                let c = self.fetch_value(ip, 2)? as u32;
                let old = self.registers[reg as usize];
                let new = ((b * c) % 32768) as u16;
                self.registers[reg as usize] = new;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new,
                    detail: Some(format!("{b} * {c}")),
                };
            }
            Opcode::Mod => {
                let reg = self.fetch_store(ip, 0)?;
                let b = self.fetch_value(ip, 1)?;
                let c = self.fetch_value(ip, 2)?;
                if c == 0 {
                    return Err(VmError::Arithmetic {
                        address: ip,
                        reason: "modulo by zero",
                    });
                }
                let old = self.registers[reg as usize];
                let new = b % c;
                self.registers[reg as usize] = new;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new,
                    detail: Some(format!("{b} % {c}")),
                };
            }
            Opcode::And => {
                let reg = self.fetch_store(ip, 0)?;
                let b = self.fetch_value(ip, 1)?;
                let c = self.fetch_value(ip, 2)?;
                let old = self.registers[reg as usize];
                let new = b & c;
                self.registers[reg as usize] = new;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new,
                    detail: Some(format!("{b} & {c}")),
                };
            }
            Opcode::Or => {
                let reg = self.fetch_store(ip, 0)?;
                let b = self.fetch_value(ip, 1)?;
                let c = self.fetch_value(ip, 2)?;
                let old = self.registers[reg as usize];
                let new = b | c;
                self.registers[reg as usize] = new;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new,
                    detail: Some(format!("{b} | {c}")),
                };
            }
            Opcode::Not => {
                let reg = self.fetch_store(ip, 0)?;
                let b = self.fetch_value(ip, 1)?;
                let old = self.registers[reg as usize];
                let new = (!b) & 0x7FFF;
                self.registers[reg as usize] = new;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new,
                    detail: Some(format!("!{b}")),
                };
            }
            Opcode::RMem => {
                let reg = self.fetch_store(ip, 0)?;
                let addr = self.fetch_value(ip, 1)?;
                let old = self.registers[reg as usize];
                let new = self.memory.raw(addr)?;
                self.registers[reg as usize] = new;
                effect = StepEffect::RegisterSet {
                    register: reg,
                    old,
                    new,
                    detail: Some(format!("mem[{addr}]")),
                };
            }
            Opcode::WMem => {
                let addr = self.fetch_value(ip, 0)?;
                let value = self.fetch_value(ip, 1)?;
                let old = self.memory.raw(addr)?;
                self.memory.set_raw(addr, value)?;
                effect = StepEffect::Wrote {
                    address: addr,
                    old,
                    new: value,
                };
            }
            Opcode::Call => {
                let target = self.fetch_value(ip, 0)?;
                let return_addr = ip.wrapping_add(opcode.len());
                self.push(return_addr);
                self.ip = target;
                effect = StepEffect::Called {
                    target,
                    return_addr,
                };
                return Ok(StepEvent {
                    ip_before: ip,
                    opcode,
                    output,
                    effect,
                });
            }
            Opcode::Ret => {
                match self.stack.pop() {
                    Some(target) => {
                        self.ip = target;
                        effect = StepEffect::Returned { target };
                    }
                    None => {
                        self.halted = true;
                        effect = StepEffect::Halted;
                    }
                }
                return Ok(StepEvent {
                    ip_before: ip,
                    opcode,
                    output,
                    effect,
                });
            }
            Opcode::Out => {
                let value = self.fetch_value(ip, 0)?;
                let byte = (value & 0xFF) as u8;
                output = Some(byte);
                effect = StepEffect::Output(byte);
            }
            Opcode::In => {
                let reg = self.fetch_store(ip, 0)?;
                let byte = self
                    .input
                    .pop_front()
                    .expect("caller must not step `in` on an empty buffer");
                self.registers[reg as usize] = byte as u16;
                effect = StepEffect::Input {
                    register: reg,
                    value: byte,
                };
            }
            Opcode::Noop => {
                effect = StepEffect::None;
            }
        }

        debug_assert_eq!(kinds.len(), opcode.arity());
        self.ip = ip.wrapping_add(opcode.len());
        Ok(StepEvent {
            ip_before: ip,
            opcode,
            output,
            effect,
        })
    }

    /// Step until the VM halts or the next instruction is `in` with an
    /// empty input buffer — the single suspension point.
    pub fn run_until_input(&mut self) -> Result<Vec<u8>, VmError> {
        self.run_until_input_with(|_| StepControl::Continue)
    }

    /// Same as `run_until_input`, but `hook` is consulted before every
    /// instruction executes (the Driver wires breakpoint checks through
    /// this without the VM knowing about the Debugger).
    pub fn run_until_input_with(
        &mut self,
        mut hook: impl FnMut(&Vm) -> StepControl,
    ) -> Result<Vec<u8>, VmError> {
        let mut out = Vec::new();
        while !self.halted {
            if self.blocked_on_input() {
                break;
            }
            if hook(self) == StepControl::Pause {
                break;
            }
            let event = self.step()?;
            if let Some(byte) = event.output {
                out.push(byte);
            }
        }
        Ok(out)
    }

    /// Same suspension rule as `run_until_input`, but also consults
    /// `observer` before and after every instruction — the single call
    /// site the Driver needs to wire up breakpoints and both tracers
    /// without the VM depending on the Debugger.
    pub fn run_until_input_observed(
        &mut self,
        observer: &mut impl StepObserver,
    ) -> Result<Vec<u8>, VmError> {
        let mut out = Vec::new();
        while !self.halted {
            if self.blocked_on_input() {
                break;
            }
            if observer.should_pause(self) {
                break;
            }
            let event = self.step()?;
            observer.on_step(self, &event);
            if let Some(byte) = event.output {
                out.push(byte);
            }
        }
        Ok(out)
    }
}

/// Lets a caller observe (and pause) the VM's step loop without the VM
/// depending on the Debugger directly.
pub trait StepObserver {
    fn should_pause(&self, vm: &Vm) -> bool;
    fn on_step(&mut self, vm: &Vm, event: &StepEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_with(words: &[u16]) -> Vm {
        Vm::new(Memory::load(words))
    }

    #[test]
    fn scenario_add_then_out_then_halt() {
        // add r0, r1, r2; out r0; halt -- with r1=7, r2=5 preset.
        let mut vm = vm_with(&[9, 32768, 32769, 32770, 19, 32768, 0]);
        vm.registers[1] = 7;
        vm.registers[2] = 5;
        let out = vm.run_until_input().unwrap();
        assert_eq!(out, vec![12]);
        assert!(vm.halted);
    }

    #[test]
    fn scenario_call_ret_out() {
        let mut vm = vm_with(&[
            1, 32768, 100, // 0: set r0, 100
            17, 8, // 3: call 8
            19, 32768, // 5: out r0
            0, // 7: halt
            18, // 8: ret
        ]);
        let out = vm.run_until_input().unwrap();
        assert_eq!(out, vec![100]);
    }

    #[test]
    fn eq_and_gt_yield_zero_or_one() {
        let mut vm = vm_with(&[4, 32768, 5, 5, 0]);
        vm.step().unwrap();
        assert_eq!(vm.registers[0], 1);

        let mut vm = vm_with(&[5, 32768, 3, 5, 0]);
        vm.step().unwrap();
        assert_eq!(vm.registers[0], 0);
    }

    #[test]
    fn add_and_mult_mask_to_15_bits() {
        let mut vm = vm_with(&[9, 32768, 32767, 32767, 0]);
        vm.step().unwrap();
        assert_eq!(vm.registers[0], (32767u32 + 32767) as u16 % 32768);

        let mut vm = vm_with(&[10, 32768, 200, 200, 0]);
        vm.step().unwrap();
        assert_eq!(vm.registers[0], (200 * 200) % 32768);
    }

    #[test]
    fn not_masks_to_15_bits() {
        let mut vm = vm_with(&[14, 32768, 0, 0]);
        vm.step().unwrap();
        assert_eq!(vm.registers[0], 0x7FFF);
    }

    #[test]
    fn jt_jf_take_or_fall_through() {
        let mut vm = vm_with(&[7, 1, 10, 0, 0]);
        let event = vm.step().unwrap();
        assert_eq!(vm.ip, 10);
        assert!(matches!(
            event.effect,
            StepEffect::Branch {
                taken: true,
                target: 10,
                ..
            }
        ));

        let mut vm = vm_with(&[8, 1, 10, 0, 0]);
        vm.step().unwrap();
        assert_eq!(vm.ip, 3);
    }

    #[test]
    fn wmem_treats_both_operands_as_values() {
        let mut vm = vm_with(&[16, 10, 42, 0, 0, 0, 0, 0, 0, 0, 0]);
        vm.step().unwrap();
        assert_eq!(vm.memory.raw(10).unwrap(), 42);
    }

    #[test]
    fn pop_on_empty_stack_errors() {
        let mut vm = vm_with(&[3, 32768, 0]);
        let err = vm.step().unwrap_err();
        assert_eq!(err, VmError::StackUnderflow { address: 0 });
    }

    #[test]
    fn ret_on_empty_stack_halts_rather_than_errors() {
        let mut vm = vm_with(&[18]);
        let event = vm.step().unwrap();
        assert!(vm.halted);
        assert_eq!(event.effect, StepEffect::Halted);
    }

    #[test]
    fn in_suspends_on_empty_buffer_without_consuming() {
        let mut vm = vm_with(&[20, 32768, 19, 32768, 0]);
        let out = vm.run_until_input().unwrap();
        assert!(out.is_empty());
        assert!(!vm.halted);
        assert_eq!(vm.ip, 0);

        vm.feed_input([b'A']);
        let out = vm.run_until_input().unwrap();
        assert_eq!(out, vec![b'A']);
        assert!(vm.halted);
    }

    #[test]
    fn invalid_opcode_is_reported_with_address() {
        let mut vm = vm_with(&[9999]);
        let err = vm.step().unwrap_err();
        assert_eq!(
            err,
            VmError::InvalidOpcode {
                address: 0,
                word: 9999
            }
        );
    }

    #[test]
    fn invalid_operand_above_register_range_is_reported() {
        let mut vm = vm_with(&[9, 32768, 40000, 1, 0]);
        let err = vm.step().unwrap_err();
        assert_eq!(
            err,
            VmError::InvalidOperand {
                address: 0,
                operand_index: 1,
                word: 40000
            }
        );
    }

    #[test]
    fn store_to_literal_target_is_an_error() {
        let mut vm = vm_with(&[1, 5, 10, 0]);
        let err = vm.step().unwrap_err();
        assert_eq!(
            err,
            VmError::InvalidStoreTarget {
                address: 0,
                operand_index: 0,
                word: 5
            }
        );
    }

    #[test]
    fn registers_and_ip_stay_in_range_after_every_step() {
        let mut vm = vm_with(&[9, 32768, 32767, 1, 19, 32768, 0]);
        loop {
            if vm.halted {
                break;
            }
            vm.step().unwrap();
            for r in vm.registers {
                assert!(r <= 32767);
            }
            if !vm.halted {
                assert!(vm.ip <= 32767);
            }
        }
    }

    #[test]
    fn stepping_off_the_end_of_memory_errors_instead_of_panicking() {
        let mut vm = Vm::new(Memory::new());
        vm.ip = (Memory::SIZE - 1) as u16;
        vm.memory.set_raw(vm.ip, Opcode::Noop.encode()).unwrap();

        let event = vm.step().unwrap();
        assert_eq!(event.effect, StepEffect::None);
        assert_eq!(vm.ip, Memory::SIZE as u16);

        let err = vm.step().unwrap_err();
        assert_eq!(
            err,
            VmError::AddressOutOfRange {
                address: Memory::SIZE as u16
            }
        );
    }
}
