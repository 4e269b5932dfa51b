//! Breakpoints, live inspection/mutation, and tracer control.
//!
//! The Debugger owns the breakpoint set and both tracers; the Driver
//! wires its breakpoint check and tracer recording into the VM through
//! `Vm::run_until_input_observed` so the VM itself never references this
//! module.

use std::cell::Cell;
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::Path;

use log::warn;

use crate::app_error::AppError;
use crate::disasm::disassemble_reachable;
use crate::trace::{ExecutionTracer, StackTracer};
use crate::vm::{StepEvent, StepObserver, Vm};

const STACK_TRACE_DEFAULT_LIMIT: usize = 10_000;

pub struct Debugger {
    breakpoints: HashSet<u16>,
    pub execution_tracer: ExecutionTracer,
    pub stack_tracer: StackTracer,
    /// Set when the stack tracer hits its limit mid-run; consumed by
    /// the next `should_pause` check so the Driver drops into debug
    /// mode at the following instruction. A `Cell` because
    /// `should_pause` only gets `&self`.
    handoff_pending: Cell<bool>,
    /// Address `go` just resumed from, so `should_pause` lets that one
    /// instruction execute instead of re-breaking on it immediately.
    /// Consumed (cleared) the first time it's checked.
    resume_skip: Cell<Option<u16>>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self {
            breakpoints: HashSet::new(),
            execution_tracer: ExecutionTracer::new(),
            stack_tracer: StackTracer::new(STACK_TRACE_DEFAULT_LIMIT),
            handoff_pending: Cell::new(false),
            resume_skip: Cell::new(None),
        }
    }
}

impl Debugger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read commands from `input` until `go`, dispatching each line to
    /// the handlers below. Malformed commands are reported and the
    /// loop re-prompts rather than propagating the error.
    pub fn run(
        &mut self,
        vm: &mut Vm,
        input: &mut impl BufRead,
        output: &mut impl Write,
    ) -> Result<(), AppError> {
        loop {
            write!(output, "debug> ").ok();
            output.flush().ok();

            let mut line = String::new();
            if input.read_line(&mut line).unwrap_or(0) == 0 {
                return Ok(());
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match self.dispatch(line, vm) {
                Ok(Some(report)) => {
                    writeln!(output, "{report}").ok();
                }
                Ok(None) => return Ok(()),
                Err(err @ AppError::UserInput { .. }) => {
                    warn!("{err}");
                    writeln!(output, "{err}").ok();
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Dispatches one command line. `Ok(None)` means `go` was entered
    /// and the debug loop should exit; `Ok(Some(_))` carries a report
    /// line to show the user.
    fn dispatch(&mut self, line: &str, vm: &mut Vm) -> Result<Option<String>, AppError> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().unwrap_or("");
        let rest: Vec<&str> = tokens.collect();

        match verb {
            "go" => {
                self.resume_skip.set(Some(vm.ip));
                Ok(None)
            }
            "b" => self.breakpoint_command(&rest, true).map(Some),
            "B" => self.breakpoint_command(&rest, false).map(Some),
            "ip" => self
                .register_like_command(
                    &rest,
                    line,
                    |vm, value| {
                        Ok(match value {
                            Some(v) => {
                                vm.ip = v;
                                format!("ip = {v}")
                            }
                            None => format!("ip = {}", vm.ip),
                        })
                    },
                    vm,
                )
                .map(Some),
            "trace" => self.trace_command(&rest, line).map(Some),
            "stack" => self.stack_command(&rest, line).map(Some),
            "disassemble" => self.disassemble_command(&rest, vm).map(Some),
            _ if verb.starts_with('r') && verb[1..].parse::<usize>().is_ok() => {
                let index: usize = verb[1..].parse().unwrap();
                self.register_command(index, &rest, line, vm).map(Some)
            }
            _ if verb.parse::<u16>().is_ok() => {
                let addr: u16 = verb.parse().unwrap();
                self.memory_command(addr, &rest, line, vm).map(Some)
            }
            _ => Err(AppError::UserInput {
                line: line.to_string(),
                reason: format!("unknown command {verb:?}"),
            }),
        }
    }

    fn breakpoint_command(&mut self, rest: &[&str], set: bool) -> Result<String, AppError> {
        match rest {
            [] => {
                let mut addrs: Vec<u16> = self.breakpoints.iter().copied().collect();
                addrs.sort_unstable();
                Ok(format!("breakpoints: {addrs:?}"))
            }
            [addr] => {
                let addr: u16 = addr.parse().map_err(|_| AppError::UserInput {
                    line: addr.to_string(),
                    reason: "expected a numeric address".to_string(),
                })?;
                if set {
                    self.breakpoints.insert(addr);
                    Ok(format!("breakpoint set at {addr}"))
                } else {
                    self.breakpoints.remove(&addr);
                    Ok(format!("breakpoint cleared at {addr}"))
                }
            }
            _ => Err(AppError::UserInput {
                line: rest.join(" "),
                reason: "expected at most one address".to_string(),
            }),
        }
    }

    fn register_like_command(
        &self,
        rest: &[&str],
        line: &str,
        apply: impl FnOnce(&mut Vm, Option<u16>) -> Result<String, AppError>,
        vm: &mut Vm,
    ) -> Result<String, AppError> {
        match rest {
            [] => apply(vm, None),
            [value] => {
                let value: u16 = value.parse().map_err(|_| AppError::UserInput {
                    line: line.to_string(),
                    reason: "expected a numeric value".to_string(),
                })?;
                apply(vm, Some(value))
            }
            _ => Err(AppError::UserInput {
                line: line.to_string(),
                reason: "expected at most one value".to_string(),
            }),
        }
    }

    fn register_command(
        &self,
        index: usize,
        rest: &[&str],
        line: &str,
        vm: &mut Vm,
    ) -> Result<String, AppError> {
        if index >= vm.registers.len() {
            return Err(AppError::UserInput {
                line: line.to_string(),
                reason: format!("no such register r{index}"),
            });
        }
        self.register_like_command(
            rest,
            line,
            |vm, value| {
                Ok(match value {
                    Some(v) => {
                        vm.registers[index] = v;
                        format!("r{index} = {v}")
                    }
                    None => format!("r{index} = {}", vm.registers[index]),
                })
            },
            vm,
        )
    }

    fn memory_command(
        &self,
        addr: u16,
        rest: &[&str],
        line: &str,
        vm: &mut Vm,
    ) -> Result<String, AppError> {
        self.register_like_command(
            rest,
            line,
            |vm, value| match value {
                Some(v) => {
                    vm.memory.set_raw(addr, v)?;
                    Ok(format!("mem[{addr}] = {v}"))
                }
                None => Ok(format!("mem[{addr}] = {}", vm.memory.raw(addr)?)),
            },
            vm,
        )
    }

    fn trace_command(&mut self, rest: &[&str], line: &str) -> Result<String, AppError> {
        match rest {
            ["on"] => {
                self.execution_tracer.set_enabled(true);
                Ok("execution trace on".to_string())
            }
            ["off"] => {
                self.execution_tracer.set_enabled(false);
                Ok("execution trace off".to_string())
            }
            ["clear"] => {
                self.execution_tracer.clear();
                Ok("execution trace cleared".to_string())
            }
            [name] => {
                let path = format!("{name}.trace");
                self.execution_tracer.write_to_file(Path::new(&path))?;
                Ok(format!("wrote {path}"))
            }
            _ => Err(AppError::UserInput {
                line: line.to_string(),
                reason: "usage: trace [on|off|clear|<name>]".to_string(),
            }),
        }
    }

    fn stack_command(&mut self, rest: &[&str], line: &str) -> Result<String, AppError> {
        match rest {
            ["on"] => {
                self.stack_tracer.set_enabled(true);
                Ok("stack trace on".to_string())
            }
            ["on", limit] => {
                let limit: usize = limit.parse().map_err(|_| AppError::UserInput {
                    line: line.to_string(),
                    reason: "expected a numeric limit".to_string(),
                })?;
                self.stack_tracer = StackTracer::new(limit);
                self.stack_tracer.set_enabled(true);
                Ok(format!("stack trace on, limit {limit}"))
            }
            ["off"] => {
                self.stack_tracer.set_enabled(false);
                Ok("stack trace off".to_string())
            }
            ["clear"] => {
                self.stack_tracer.clear();
                Ok("stack trace cleared".to_string())
            }
            [name] => {
                let path = format!("{name}.csv");
                self.stack_tracer.write_to_file(Path::new(&path))?;
                Ok(format!("wrote {path}"))
            }
            _ => Err(AppError::UserInput {
                line: line.to_string(),
                reason: "usage: stack [on [limit]|off|clear|<name>]".to_string(),
            }),
        }
    }

    fn disassemble_command(&self, rest: &[&str], vm: &Vm) -> Result<String, AppError> {
        let (addr, name) = match rest {
            [] => (0u16, "challenge".to_string()),
            [addr] => {
                let addr: u16 = addr.parse().map_err(|_| AppError::UserInput {
                    line: addr.to_string(),
                    reason: "expected a numeric address".to_string(),
                })?;
                (addr, "challenge".to_string())
            }
            [addr, name] => {
                let addr: u16 = addr.parse().map_err(|_| AppError::UserInput {
                    line: addr.to_string(),
                    reason: "expected a numeric address".to_string(),
                })?;
                (addr, name.to_string())
            }
            _ => {
                return Err(AppError::UserInput {
                    line: rest.join(" "),
                    reason: "usage: disassemble [addr [name]]".to_string(),
                });
            }
        };

        let lines = disassemble_reachable(&vm.memory, addr);
        let path = format!("{name}.asm");
        std::fs::write(&path, lines.join("\n")).map_err(|source| AppError::Io {
            path: path.clone().into(),
            source,
        })?;
        Ok(format!("wrote {path}"))
    }
}

impl StepObserver for Debugger {
    /// Checked before every instruction executes. `resume_skip` lets the
    /// instruction `go` just resumed from execute once without
    /// immediately re-breaking on the same breakpoint.
    fn should_pause(&self, vm: &Vm) -> bool {
        if self.resume_skip.replace(None) == Some(vm.ip) {
            return false;
        }
        self.breakpoints.contains(&vm.ip) || self.handoff_pending.replace(false)
    }

    /// Checked after every instruction executes, feeding both tracers.
    /// When the stack tracer hits its configured limit it disables
    /// itself and this sets `handoff_pending` so the Driver drops into
    /// debug mode at the next instruction.
    fn on_step(&mut self, vm: &Vm, event: &StepEvent) {
        self.execution_tracer.record(&vm.memory, event);
        if self.stack_tracer.record(vm, event) {
            self.handoff_pending.set(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;
    use std::io::Cursor;

    fn debugger_with_vm() -> (Debugger, Vm) {
        (Debugger::new(), Vm::new(Memory::load(&[21, 0])))
    }

    #[test]
    fn sets_and_lists_breakpoints() {
        let (mut debugger, mut vm) = debugger_with_vm();
        assert_eq!(
            debugger.dispatch("b 10", &mut vm).unwrap(),
            Some("breakpoint set at 10".to_string())
        );
        assert!(debugger.should_pause(&{
            vm.ip = 10;
            vm.clone()
        }));
    }

    #[test]
    fn go_lets_execution_advance_past_the_breakpoint_it_paused_on() {
        let (mut debugger, mut vm) = debugger_with_vm();
        debugger.dispatch("b 10", &mut vm).unwrap();
        vm.ip = 10;
        assert!(debugger.should_pause(&vm));

        debugger.dispatch("go", &mut vm).unwrap();
        assert!(!debugger.should_pause(&vm), "go must skip the breakpoint once");
        assert!(
            debugger.should_pause(&vm),
            "the breakpoint must re-arm for the next time ip reaches it"
        );
    }

    #[test]
    fn clears_breakpoints_with_capital_b() {
        let (mut debugger, mut vm) = debugger_with_vm();
        debugger.dispatch("b 10", &mut vm).unwrap();
        debugger.dispatch("B 10", &mut vm).unwrap();
        assert!(!debugger.breakpoints.contains(&10));
    }

    #[test]
    fn reads_and_writes_registers() {
        let (mut debugger, mut vm) = debugger_with_vm();
        debugger.dispatch("r0 42", &mut vm).unwrap();
        assert_eq!(vm.registers[0], 42);
        let report = debugger.dispatch("r0", &mut vm).unwrap();
        assert_eq!(report, Some("r0 = 42".to_string()));
    }

    #[test]
    fn reads_and_writes_memory_by_address() {
        let (mut debugger, mut vm) = debugger_with_vm();
        debugger.dispatch("5 99", &mut vm).unwrap();
        assert_eq!(vm.memory.raw(5).unwrap(), 99);
    }

    #[test]
    fn unknown_command_is_user_input_error() {
        let (mut debugger, mut vm) = debugger_with_vm();
        let err = debugger.dispatch("frobnicate", &mut vm).unwrap_err();
        assert!(matches!(err, AppError::UserInput { .. }));
    }

    #[test]
    fn go_ends_the_debug_loop() {
        let (mut debugger, mut vm) = debugger_with_vm();
        let mut input = Cursor::new(b"bogus\ngo\n".to_vec());
        let mut output = Vec::new();
        let mut reader = std::io::BufReader::new(&mut input);
        debugger.run(&mut vm, &mut reader, &mut output).unwrap();
        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("unknown command"));
    }
}
