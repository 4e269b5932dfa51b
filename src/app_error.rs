//! Faults that surface at the Driver/Debugger/CLI boundary.
//!
//! `VmError` converts into this without losing the faulting address, so a
//! fault encountered while pumping the main loop reports the same way as
//! any other setup failure.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::VmError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize snapshot: {source}")]
    Serialization {
        #[source]
        source: bincode::Error,
    },

    #[error("malformed command {line:?}: {reason}")]
    UserInput { line: String, reason: String },

    #[error("solver {solver} found no solution")]
    SolverNotFound { solver: &'static str },

    #[error("vm fault at address {address}: {source}")]
    Vm {
        address: u16,
        #[source]
        source: VmError,
    },
}

impl From<VmError> for AppError {
    fn from(source: VmError) -> Self {
        AppError::Vm {
            address: source.address(),
            source,
        }
    }
}
