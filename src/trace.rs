//! The two tracers: a per-step execution trace and a push/pop/
//! call/ret stack trace with bidirectionally cross-linked rows.

use std::fs;
use std::path::Path;

use crate::app_error::AppError;
use crate::disasm::render_one;
use crate::memory::Memory;
use crate::vm::{StepEffect, StepEvent, Vm};

/// One line per step: disassembly padded to column 35, then an
/// interpretation of what changed.
#[derive(Debug, Default)]
pub struct ExecutionTracer {
    enabled: bool,
    lines: Vec<String>,
}

impl ExecutionTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Record one step. `memory` must reflect state *before* the step (the
    /// caller renders the disassembly first, or passes a snapshot of it),
    /// matching how the Driver pumps the VM.
    pub fn record(&mut self, memory: &Memory, event: &StepEvent) {
        if !self.enabled {
            return;
        }
        let rendered = render_one(memory, event.ip_before).text;
        let interpretation = interpret(event);
        self.lines.push(format!("{rendered:<35}{interpretation}"));
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), AppError> {
        let body = self.lines.join("\n");
        fs::write(path, body).map_err(|source| AppError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Renders `event`'s already-computed effect; since the tracer only
/// observes a `StepEvent` after the VM has executed it, there is no
/// separate peek/consume path to keep in sync with actual execution.
fn interpret(event: &StepEvent) -> String {
    match &event.effect {
        StepEffect::None | StepEffect::Halted => String::new(),
        StepEffect::RegisterSet {
            register,
            old,
            new,
            detail: Some(detail),
        } => format!("r{register} = {detail} replacing {old} with {new}"),
        StepEffect::RegisterSet {
            register, old, new, ..
        } => format!("r{register} = {new} replacing {old}"),
        StepEffect::Pushed(value) => format!("push {value}"),
        StepEffect::Popped { register, value } => format!("pop -> r{register} = {value}"),
        StepEffect::Wrote { address, old, new } => {
            format!("mem[{address}] = {new} replacing {old}")
        }
        StepEffect::Jumped { target } => format!("jump to {target}"),
        StepEffect::Branch {
            taken,
            compared,
            target,
        } => {
            let verdict = if *taken { "taken" } else { "not taken" };
            format!("condition on {compared}: {verdict} (target {target})")
        }
        StepEffect::Called {
            target,
            return_addr,
        } => format!("call {target}, return to {return_addr}"),
        StepEffect::Returned { target } => format!("return to {target}"),
        StepEffect::Output(byte) => format!("out {byte} ('{}')", byte_as_char(*byte)),
        StepEffect::Input { register, value } => {
            format!("r{register} <- {value} ('{}')", byte_as_char(*value))
        }
    }
}

fn byte_as_char(byte: u8) -> char {
    if byte.is_ascii_graphic() || byte == b' ' {
        byte as char
    } else if byte == b'\n' {
        '\u{21b5}'
    } else {
        '\u{fffd}'
    }
}

/// One row of the stack trace: triggered only on `push`, `pop`, `call`,
/// `ret`. `cross_link` is the 1-relative index of the row that
/// produced/consumed the same stack slot, filled in on both sides once
/// known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRow {
    pub ip: u16,
    pub opcode_name: &'static str,
    pub r0: u16,
    pub r1: u16,
    pub value: u16,
    pub is_push: bool,
    pub cross_link: Option<usize>,
}

#[derive(Debug, Default)]
pub struct StackTracer {
    enabled: bool,
    limit: usize,
    rows: Vec<StackRow>,
    /// Indices (1-relative) of push/call rows awaiting a matching pop/ret.
    pending: Vec<usize>,
}

impl StackTracer {
    pub fn new(limit: usize) -> Self {
        Self {
            enabled: false,
            limit,
            rows: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.pending.clear();
    }

    pub fn rows(&self) -> &[StackRow] {
        &self.rows
    }

    /// Returns `true` when the buffer just hit its limit and the tracer
    /// disabled itself, signalling the caller to hand control to the
    /// debugger.
    pub fn record(&mut self, vm: &Vm, event: &StepEvent) -> bool {
        if !self.enabled {
            return false;
        }
        let (is_push, value) = match &event.effect {
            StepEffect::Pushed(value) => (true, *value),
            StepEffect::Called { return_addr, .. } => (true, *return_addr),
            StepEffect::Popped { value, .. } => (false, *value),
            StepEffect::Returned { target } => (false, *target),
            _ => return false,
        };

        let row_index = self.rows.len() + 1;
        let mut row = StackRow {
            ip: event.ip_before,
            opcode_name: event.opcode.mnemonic(),
            r0: vm.registers[0],
            r1: vm.registers[1],
            value,
            is_push,
            cross_link: None,
        };

        if is_push {
            self.pending.push(row_index);
        } else if let Some(matching) = self.pending.pop() {
            row.cross_link = Some(matching);
            if let Some(partner) = self.rows.get_mut(matching - 1) {
                partner.cross_link = Some(row_index);
            }
        }

        self.rows.push(row);

        if self.rows.len() >= self.limit {
            self.enabled = false;
            return true;
        }
        false
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), AppError> {
        let mut body = String::from("ip,opcode,r0,r1,value,direction,cross_link\n");
        for row in &self.rows {
            let direction = if row.is_push { "push" } else { "pop" };
            let cross = row
                .cross_link
                .map(|i| i.to_string())
                .unwrap_or_else(|| String::from(""));
            body.push_str(&format!(
                "{},{},{},{},{},{},{}\n",
                row.ip, row.opcode_name, row.r0, row.r1, row.value, direction, cross
            ));
        }
        fs::write(path, body).map_err(|source| AppError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    fn step_event(vm: &mut Vm) -> StepEvent {
        vm.step().unwrap()
    }

    #[test]
    fn execution_tracer_formats_arithmetic_detail() {
        let mut vm = Vm::new(Memory::load(&[9, 32768, 32769, 32770, 0]));
        vm.registers[1] = 5;
        vm.registers[2] = 7;
        let memory_before = vm.memory.clone();
        let mut tracer = ExecutionTracer::new();
        tracer.set_enabled(true);

        let event = step_event(&mut vm);
        tracer.record(&memory_before, &event);

        assert_eq!(tracer.lines().len(), 1);
        assert!(tracer.lines()[0].contains("r0 = 5 + 7 replacing 0 with 12"));
    }

    #[test]
    fn disabled_execution_tracer_records_nothing() {
        let mut vm = Vm::new(Memory::load(&[21, 0]));
        let memory_before = vm.memory.clone();
        let mut tracer = ExecutionTracer::new();
        let event = step_event(&mut vm);
        tracer.record(&memory_before, &event);
        assert!(tracer.lines().is_empty());
    }

    #[test]
    fn stack_tracer_cross_links_push_and_pop() {
        // push 5; pop r0; halt
        let mut vm = Vm::new(Memory::load(&[2, 5, 3, 32768, 0]));
        let mut tracer = StackTracer::new(100);
        tracer.set_enabled(true);

        let push_event = step_event(&mut vm);
        tracer.record(&vm, &push_event);
        let pop_event = step_event(&mut vm);
        tracer.record(&vm, &pop_event);

        assert_eq!(tracer.rows().len(), 2);
        assert_eq!(tracer.rows()[0].cross_link, Some(2));
        assert_eq!(tracer.rows()[1].cross_link, Some(1));
    }

    #[test]
    fn stack_tracer_disables_itself_at_limit() {
        // push 1; push 2; halt
        let mut vm = Vm::new(Memory::load(&[2, 1, 2, 2, 0]));
        let mut tracer = StackTracer::new(1);
        tracer.set_enabled(true);

        let first = step_event(&mut vm);
        let hit_limit = tracer.record(&vm, &first);
        assert!(hit_limit);
        assert!(!tracer.enabled());

        let second = step_event(&mut vm);
        let hit_again = tracer.record(&vm, &second);
        assert!(!hit_again);
        assert_eq!(tracer.rows().len(), 1);
    }
}
