//! Build script that renders the `ferry` man pages.
//!
//! `ferry.1` documents the top-level command and every subcommand gets its
//! own `ferry-<subcommand>.1`. Pages land in `OUT_DIR` for packaging.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let root = cli::Cli::command();
    let root_name = root.get_name().to_owned();
    for subcommand in root.get_subcommands() {
        let page = format!("{root_name}-{}", subcommand.get_name());
        write_page(&out_dir, &page, subcommand.clone().name(page.clone()))?;
    }
    write_page(&out_dir, &root_name, root)?;

    Ok(())
}

fn write_page(out_dir: &Path, page: &str, command: Command) -> io::Result<()> {
    let mut rendered = Vec::new();
    Man::new(command).render(&mut rendered)?;
    fs::write(out_dir.join(format!("{page}.1")), rendered)
}
