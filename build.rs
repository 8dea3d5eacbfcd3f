//! Renders the `hetzner-machine(1)` man page into `OUT_DIR` from the clap
//! definitions the binary parses with.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};

use camino::Utf8PathBuf;
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

const MAN_PAGE: &str = "hetzner-machine.1";

fn out_dir() -> Result<Utf8PathBuf, Box<dyn Error>> {
    let raw = env::var("OUT_DIR")
        .map_err(|err| io::Error::new(io::ErrorKind::NotFound, format!("OUT_DIR: {err}")))?;
    Ok(Utf8PathBuf::from(raw))
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout().lock();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let command = cli::Cli::command().version(env!("CARGO_PKG_VERSION"));
    let mut page = Vec::new();
    Man::new(command).render(&mut page)?;
    fs::write(out_dir()?.join(MAN_PAGE), page)?;
    Ok(())
}
