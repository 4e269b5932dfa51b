use std::io::{BufReader, Write};
use std::path::Path;

use anyhow::Context;
use clap::Parser;

use synacor_vm::cli::Cli;
use synacor_vm::driver::Driver;
use synacor_vm::memory::Memory;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    let memory = load_binary(&cli.binary)
        .with_context(|| format!("loading challenge binary {}", cli.binary.display()))?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut driver = Driver::new(
        memory,
        cli.snapshot_dir,
        BufReader::new(stdin.lock()),
        stdout.lock(),
    );

    driver.run()?;
    std::io::stdout().flush().ok();
    Ok(())
}

/// Decode the challenge binary as little-endian 16-bit words.
fn load_binary(path: &Path) -> anyhow::Result<Memory> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

    if bytes.len() % 2 != 0 {
        anyhow::bail!("{}: odd byte count ({})", path.display(), bytes.len());
    }

    let words: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    if words.len() > Memory::SIZE {
        anyhow::bail!(
            "{}: {} words exceeds the {} cell address space",
            path.display(),
            words.len(),
            Memory::SIZE
        );
    }

    Ok(Memory::load(&words))
}
