//! The REPL that pumps the VM, routes meta-commands, and owns every
//! touch of stdin/stdout so the engines stay terminal-free.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use log::{debug, info};

use crate::app_error::AppError;
use crate::debugger::Debugger;
use crate::memory::Memory;
use crate::snapshot::Snapshot;
use crate::solver::{teleporter, vault};
use crate::vm::Vm;

const DEFAULT_SNAPSHOT_NAME: &str = "quicksave";

pub struct Driver<R, W> {
    vm: Vm,
    initial_memory: Memory,
    debugger: Debugger,
    snapshot_dir: PathBuf,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Driver<R, W> {
    pub fn new(memory: Memory, snapshot_dir: PathBuf, input: R, output: W) -> Self {
        Self {
            vm: Vm::new(memory.clone()),
            initial_memory: memory,
            debugger: Debugger::new(),
            snapshot_dir,
            input,
            output,
        }
    }

    /// Pump the VM to completion, routing each user line the VM can't
    /// consume itself to a meta-command handler or straight into the
    /// VM's input buffer.
    pub fn run(&mut self) -> Result<(), AppError> {
        loop {
            let bytes = self.vm.run_until_input_observed(&mut self.debugger)?;
            self.write_output(&bytes)?;

            if self.vm.halted {
                return Ok(());
            }

            if !self.vm.blocked_on_input() {
                // Paused by a breakpoint or a stack-trace handoff rather
                // than suspended on empty input.
                self.debugger
                    .run(&mut self.vm, &mut self.input, &mut self.output)?;
                continue;
            }

            let mut line = String::new();
            if self.input.read_line(&mut line).unwrap_or(0) == 0 {
                return Ok(());
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);

            match self.dispatch_meta(trimmed)? {
                MetaOutcome::Handled => continue,
                MetaOutcome::Terminate => return Ok(()),
                MetaOutcome::Forward => {
                    self.vm.feed_input(trimmed.bytes());
                    self.vm.feed_input(std::iter::once(b'\n'));
                }
            }
        }
    }

    fn dispatch_meta(&mut self, line: &str) -> Result<MetaOutcome, AppError> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().unwrap_or("");
        let rest: Vec<&str> = tokens.collect();

        match verb {
            "help" => {
                self.print_help(&rest)?;
                Ok(MetaOutcome::Handled)
            }
            "save" => {
                let name = rest.first().copied().unwrap_or(DEFAULT_SNAPSHOT_NAME);
                self.save(name)?;
                Ok(MetaOutcome::Handled)
            }
            "restore" => {
                let name = rest.first().copied().unwrap_or(DEFAULT_SNAPSHOT_NAME);
                self.restore(name)?;
                Ok(MetaOutcome::Handled)
            }
            "restart" => {
                self.vm = Vm::new(self.initial_memory.clone());
                Ok(MetaOutcome::Handled)
            }
            "debug" => {
                self.debugger
                    .run(&mut self.vm, &mut self.input, &mut self.output)?;
                Ok(MetaOutcome::Handled)
            }
            "solve" => {
                self.solve(rest.first().copied())?;
                Ok(MetaOutcome::Handled)
            }
            "die" => {
                self.vm.halted = true;
                Ok(MetaOutcome::Terminate)
            }
            "" => Ok(MetaOutcome::Handled),
            _ => Ok(MetaOutcome::Forward),
        }
    }

    fn solve(&mut self, which: Option<&str>) -> Result<(), AppError> {
        match which {
            Some("teleporter") => {
                let k = teleporter::solve(&mut self.vm)?;
                info!("teleporter solved: r7 = {k}");
                writeln!(self.output, "teleporter: r7 = {k}").ok();
                Ok(())
            }
            Some("vault") => {
                let path = vault::solve(&mut self.vm)?;
                info!("vault solved: {} moves", path.len());
                writeln!(self.output, "vault: {} moves queued", path.len()).ok();
                Ok(())
            }
            other => Err(AppError::UserInput {
                line: format!("solve {}", other.unwrap_or("")),
                reason: "usage: solve teleporter|vault".to_string(),
            }),
        }
    }

    fn save(&mut self, name: &str) -> Result<(), AppError> {
        let path = self.snapshot_dir.join(format!("{name}.sav"));
        Snapshot::capture(&self.vm).save_to_file(&path)?;
        debug!("saved snapshot to {}", path.display());
        Ok(())
    }

    fn restore(&mut self, name: &str) -> Result<(), AppError> {
        let path = self.snapshot_dir.join(format!("{name}.sav"));
        let snapshot = Snapshot::load_from_file(&path)?;
        self.vm = snapshot.restore();
        debug!("restored snapshot from {}", path.display());
        Ok(())
    }

    fn print_help(&mut self, topic: &[&str]) -> Result<(), AppError> {
        let body = match topic.first().copied() {
            None => {
                "meta-commands: help [topic], save [name], restore [name], restart, debug, \
                 solve teleporter|vault, die"
            }
            Some("debug") => "debug: b/B, ip, rN, <addr>, trace, stack, disassemble, go",
            Some("solve") => "solve teleporter|vault: runs the matching puzzle solver",
            Some(_) => "no help for that topic",
        };
        writeln!(self.output, "{body}").ok();
        Ok(())
    }

    /// Prints VM output verbatim as ASCII; bytes outside printable/
    /// whitespace ASCII are shown as U+FFFD without touching the
    /// underlying byte in any trace or log.
    fn write_output(&mut self, bytes: &[u8]) -> Result<(), AppError> {
        for &byte in bytes {
            if byte.is_ascii_graphic() || byte.is_ascii_whitespace() {
                write!(self.output, "{}", byte as char).ok();
            } else {
                write!(self.output, "\u{FFFD}").ok();
            }
        }
        self.output.flush().ok();
        Ok(())
    }
}

enum MetaOutcome {
    Handled,
    Forward,
    Terminate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn driver_with(words: &[u16], lines: &str) -> Driver<Cursor<Vec<u8>>, Vec<u8>> {
        Driver::new(
            Memory::load(words),
            PathBuf::from("."),
            Cursor::new(lines.as_bytes().to_vec()),
            Vec::new(),
        )
    }

    #[test]
    fn forwards_non_meta_lines_as_vm_input() {
        // in r0; out r0; halt
        let mut driver = driver_with(&[20, 32768, 19, 32768, 0], "Q\n");
        driver.run().unwrap();
        let printed = String::from_utf8(driver.output.clone()).unwrap();
        assert_eq!(printed, "Q");
    }

    #[test]
    fn die_halts_and_terminates() {
        let mut driver = driver_with(&[20, 32768, 19, 32768, 0], "die\n");
        driver.run().unwrap();
        assert!(driver.vm.halted);
    }

    #[test]
    fn restart_resets_to_initial_memory() {
        // Blocks on `in` immediately, so the command line is read before
        // any instruction executes.
        let mut driver = driver_with(&[20, 32768, 19, 32768, 0], "restart\n");
        driver.vm.registers[0] = 77;
        driver.run().unwrap();
        assert_eq!(driver.vm.registers[0], 0);
    }

    #[test]
    fn save_then_restore_round_trips_through_a_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = Driver::new(
            Memory::load(&[20, 32768, 19, 32768, 0]),
            dir.path().to_path_buf(),
            Cursor::new(b"save test\n".to_vec()),
            Vec::new(),
        );
        driver.run().unwrap();
        assert!(dir.path().join("test.sav").exists());
    }
}
