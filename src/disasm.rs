//! Disassembly: single-address rendering and the reachability walk that
//! follows control flow from a starting address.
//!
//! The walk is one-way — there is no assembler in this crate, matching
//! the Architecture's Non-goals.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::memory::Memory;
use crate::opcode::Opcode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub address: u16,
    pub text: String,
    pub length: u16,
}

fn render_operand(word: u16) -> String {
    match Memory::register_index(word) {
        Some(r) => format!("r{r}"),
        None => word.to_string(),
    }
}

/// A branch target is only statically known when the operand word is a
/// literal; a register-held destination cannot be followed. Addresses
/// past the end of memory resolve to `None`, same as an unknown target.
fn literal_operand(memory: &Memory, addr: u16, operand_index: u8) -> Option<u16> {
    let target = addr.wrapping_add(1).wrapping_add(operand_index as u16);
    let word = memory.raw(target).ok()?;
    (word <= 32767).then_some(word)
}

/// Render the instruction at `addr` as `NNNN: mnemonic arg1, arg2, arg3`.
pub fn render_one(memory: &Memory, addr: u16) -> Rendered {
    let Ok(word) = memory.raw(addr) else {
        return Rendered {
            address: addr,
            text: format!("{addr}: ??? (out of range)"),
            length: 1,
        };
    };
    match Opcode::decode(word) {
        Some(opcode) => {
            let args: Vec<String> = (0..opcode.arity())
                .map(|i| {
                    let operand_addr = addr.wrapping_add(1).wrapping_add(i as u16);
                    render_operand(memory.raw(operand_addr).unwrap_or(0))
                })
                .collect();
            let text = if args.is_empty() {
                format!("{addr}: {}", opcode.mnemonic())
            } else {
                format!("{addr}: {} {}", opcode.mnemonic(), args.join(", "))
            };
            Rendered {
                address: addr,
                text,
                length: opcode.len(),
            }
        }
        None => Rendered {
            address: addr,
            text: format!("{addr}: ??? ({word})"),
            length: 1,
        },
    }
}

/// Successor addresses of the instruction at `addr`, by opcode class.
fn successors(memory: &Memory, addr: u16) -> Vec<u16> {
    let Some(opcode) = memory.raw(addr).ok().and_then(Opcode::decode) else {
        return Vec::new();
    };
    let next = addr.wrapping_add(opcode.len());
    match opcode {
        Opcode::Halt | Opcode::Ret => Vec::new(),
        Opcode::Jmp => literal_operand(memory, addr, 0).into_iter().collect(),
        Opcode::Call => {
            let mut targets = vec![next];
            targets.extend(literal_operand(memory, addr, 0));
            targets
        }
        Opcode::Jt | Opcode::Jf => {
            let mut targets = vec![next];
            targets.extend(literal_operand(memory, addr, 1));
            targets
        }
        _ => vec![next],
    }
}

/// Disassemble every address reachable from `start` by following control
/// flow (not linear scanning), returning formatted lines with a `...`
/// sentinel wherever two adjacent entries are not contiguous in memory.
pub fn disassemble_reachable(memory: &Memory, start: u16) -> Vec<String> {
    let mut completed: BTreeMap<u16, Rendered> = BTreeMap::new();
    let mut queued: HashSet<u16> = HashSet::from([start]);
    let mut pending: VecDeque<u16> = VecDeque::from([start]);

    while let Some(addr) = pending.pop_front() {
        if completed.contains_key(&addr) {
            continue;
        }
        let rendered = render_one(memory, addr);
        for target in successors(memory, addr) {
            if !completed.contains_key(&target) && queued.insert(target) {
                pending.push_back(target);
            }
        }
        completed.insert(addr, rendered);
    }

    let mut lines = Vec::with_capacity(completed.len());
    let mut prev_end: Option<u16> = None;
    for (addr, rendered) in &completed {
        if let Some(end) = prev_end {
            if end != *addr {
                lines.push("...".to_string());
            }
        }
        lines.push(rendered.text.clone());
        prev_end = Some(addr + rendered.length);
    }
    lines
}
