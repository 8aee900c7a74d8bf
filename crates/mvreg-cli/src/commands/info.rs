use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use mvreg_core::Archive;

use crate::summary::print_archive_contents;

#[derive(Args)]
pub struct InfoArgs {
    /// Archive directory
    #[arg(short, long)]
    pub archive: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    if !args.archive.is_dir() {
        anyhow::bail!("No archive at {}", args.archive.display());
    }
    let mut archive = Archive::open(&args.archive)
        .with_context(|| format!("Failed to open archive {}", args.archive.display()))?;

    print_archive_contents(&archive)?;

    archive.close()?;
    Ok(())
}
