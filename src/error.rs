//! Library-internal faults raised by the Architecture VM itself.
//!
//! These never depend on `anyhow` or any I/O type — the VM core stays
//! usable as a plain library even outside the CLI driver built around it.

use thiserror::Error;

/// A fault raised while decoding or executing a single instruction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("address {address} is outside the 32,768-cell memory")]
    AddressOutOfRange { address: u16 },

    #[error("invalid opcode {word} at address {address}")]
    InvalidOpcode { address: u16, word: u16 },

    #[error("invalid operand {word} at address {address} (operand #{operand_index})")]
    InvalidOperand {
        address: u16,
        operand_index: u8,
        word: u16,
    },

    #[error("store target {word} at address {address} (operand #{operand_index}) is not a register")]
    InvalidStoreTarget {
        address: u16,
        operand_index: u8,
        word: u16,
    },

    #[error("stack underflow at address {address}")]
    StackUnderflow { address: u16 },

    #[error("arithmetic error at address {address}: {reason}")]
    Arithmetic { address: u16, reason: &'static str },
}

impl VmError {
    /// The address at which the fault occurred, for uniform reporting.
    pub fn address(&self) -> u16 {
        match self {
            VmError::AddressOutOfRange { address }
            | VmError::InvalidOpcode { address, .. }
            | VmError::InvalidOperand { address, .. }
            | VmError::InvalidStoreTarget { address, .. }
            | VmError::StackUnderflow { address }
            | VmError::Arithmetic { address, .. } => *address,
        }
    }
}
