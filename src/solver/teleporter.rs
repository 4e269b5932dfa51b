//! Reverse-engineers the confirmation routine the challenge calls with
//! r7 ("mystery") as an extra parameter, then patches the running VM to
//! accept the discovered value.
//!
//! `A(m,n;k) = n+1 if m=0; A(m-1,k;k) if n=0; A(m-1,A(m,n-1;k);k) else`,
//! every result masked to 15 bits. The binary only ever calls this with
//! `m` small enough that a naive recursive translation would still blow
//! the native stack for the wrong `k`, so the evaluator below is
//! iterative with an explicit frame stack.

use log::info;

use crate::app_error::AppError;
use crate::opcode::Opcode;
use crate::vm::Vm;

const MASK: u32 = 32768;
const MAX_M: usize = 4;

/// Addresses the shipped binary stores its confirmation-routine
/// parameters and the two-instruction call it makes to verify them.
const ADDR_M: u16 = 5485;
const ADDR_N: u16 = 5488;
const ADDR_CONFIRM_CALL: u16 = 5489;
const ADDR_TARGET_WRITE: u16 = 5493;
const ADDR_TARGET: u16 = 5494;

enum Frame {
    Entry { m: u16, n: u16 },
    AfterInner { m: u16, n: u16 },
    Store { m: u16, n: u16 },
}

/// Memo table indexed `[m][n]`; `m` is bounded by `MAX_M` per the
/// binary's own parameters, so a flat array suffices.
struct Memo {
    table: Vec<Vec<Option<u16>>>,
}

impl Memo {
    fn new() -> Self {
        Self {
            table: vec![vec![None; 32768]; MAX_M + 1],
        }
    }

    fn get(&self, m: u16, n: u16) -> Option<u16> {
        self.table[m as usize][n as usize]
    }

    fn set(&mut self, m: u16, n: u16, value: u16) {
        self.table[m as usize][n as usize] = value;
    }
}

/// Evaluate `A(m,n;k)` iteratively with an explicit stack carrying each
/// frame's continuation phase (ENTRY, AFTER-INNER, STORE), memoising on
/// `(m,n)` for a fixed `k`.
pub fn ackermann(m: u16, n: u16, k: u16) -> u16 {
    let mut memo = Memo::new();
    let mut stack = vec![Frame::Entry { m, n }];
    let mut acc: u16 = 0;

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Entry { m, n } => {
                if m == 0 {
                    acc = ((n as u32 + 1) % MASK) as u16;
                    continue;
                }
                if let Some(cached) = memo.get(m, n) {
                    acc = cached;
                    continue;
                }
                if n == 0 {
                    stack.push(Frame::Store { m, n });
                    stack.push(Frame::Entry { m: m - 1, n: k });
                } else {
                    stack.push(Frame::AfterInner { m, n });
                    stack.push(Frame::Entry { m, n: n - 1 });
                }
            }
            Frame::AfterInner { m, n } => {
                stack.push(Frame::Store { m, n });
                stack.push(Frame::Entry { m: m - 1, n: acc });
            }
            Frame::Store { m, n } => {
                memo.set(m, n, acc);
            }
        }
    }

    acc
}

/// Search k (matching target's parity, per `A(m,n;k) ≡ k (mod 2)` for
/// `m ≥ 1`) for the value making `A(m,n;k) = target`.
pub fn search(m: u16, n: u16, target: u16) -> Option<u16> {
    let start = if target % 2 == 0 { 2u16 } else { 1u16 };
    let mut tried = 0u32;
    let mut k = start;
    loop {
        if k > 32767 {
            return None;
        }
        if ackermann(m, n, k) == target {
            return Some(k);
        }
        tried += 1;
        if tried % 1024 == 0 {
            info!("teleporter search: {tried} candidates tried, k={k}");
        }
        k += 2;
    }
}

/// Run the search against the live VM's memory, then patch it: write
/// the discovered `k` to r7, neutralise the in-binary confirmation call
/// with two `noop`s, and force the subsequent equality check to pass.
pub fn solve(vm: &mut Vm) -> Result<u16, AppError> {
    let m = vm.memory.raw(ADDR_M)?;
    let n = vm.memory.raw(ADDR_N)?;
    let target = vm.memory.raw(ADDR_TARGET)?;

    let k = search(m, n, target).ok_or(AppError::SolverNotFound {
        solver: "teleporter",
    })?;

    vm.registers[7] = k;
    let noop = Opcode::Noop.encode();
    vm.memory.set_raw(ADDR_CONFIRM_CALL, noop)?;
    vm.memory.set_raw(ADDR_CONFIRM_CALL + 1, noop)?;
    vm.memory.set_raw(ADDR_TARGET_WRITE, target)?;

    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_case_increments_n() {
        assert_eq!(ackermann(0, 5, 999), 6);
        assert_eq!(ackermann(0, 32767, 1), 0);
    }

    #[test]
    fn small_twisted_ackermann_value() {
        assert_eq!(ackermann(4, 1, 1), 2);
    }

    #[test]
    fn result_parity_matches_k_for_m_at_least_one() {
        for k in [3u16, 4, 7, 10] {
            let result = ackermann(1, 2, k);
            assert_eq!(result % 2, k % 2);
        }
    }

    #[test]
    fn search_finds_the_published_k() {
        assert_eq!(search(4, 1, 6), Some(25734));
    }

    #[test]
    fn solve_patches_registers_and_memory() {
        let mut memory = crate::memory::Memory::new();
        memory.set_raw(ADDR_M, 4).unwrap();
        memory.set_raw(ADDR_N, 1).unwrap();
        memory.set_raw(ADDR_TARGET, 6).unwrap();
        let mut vm = Vm::new(memory);

        let k = solve(&mut vm).unwrap();

        assert_eq!(k, 25734);
        assert_eq!(vm.registers[7], 25734);
        assert_eq!(vm.memory.raw(ADDR_CONFIRM_CALL).unwrap(), Opcode::Noop.encode());
        assert_eq!(
            vm.memory.raw(ADDR_CONFIRM_CALL + 1).unwrap(),
            Opcode::Noop.encode()
        );
        assert_eq!(vm.memory.raw(ADDR_TARGET_WRITE).unwrap(), 6);
    }
}
