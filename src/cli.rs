//! Process entry-point argument surface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "synacor", about = "Synacor Challenge VM, debugger, and solvers")]
pub struct Cli {
    /// Challenge binary to load.
    #[arg(default_value = "challenge.bin")]
    pub binary: PathBuf,

    /// Directory save/restore snapshots are read from and written to.
    #[arg(long = "snapshot-dir", default_value = ".")]
    pub snapshot_dir: PathBuf,

    /// Raise the log filter from `warn`: -v = info, -vv = debug, -vvv = trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
