//! Puzzle solvers that search for values the Architecture's own logic
//! cannot be asked to search for directly, then patch the running VM.

pub mod teleporter;
pub mod vault;
