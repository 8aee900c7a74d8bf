use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use mvreg_core::io::{import_directory, ImportOptions};
use mvreg_core::Archive;

#[derive(Args)]
pub struct ImportArgs {
    /// Directory holding the named image and transform files
    pub dir: PathBuf,

    /// Archive directory (created if missing)
    #[arg(short, long)]
    pub archive: PathBuf,

    /// Also create rescaled originals at these percentages, e.g. 50,25
    #[arg(long, value_delimiter = ',')]
    pub scales: Vec<u32>,

    /// Replace entries that already exist in the archive
    #[arg(long)]
    pub overwrite: bool,
}

pub fn run(args: &ImportArgs) -> Result<()> {
    let mut archive = Archive::open(&args.archive)
        .with_context(|| format!("Failed to open archive {}", args.archive.display()))?;

    println!("Importing {}...", args.dir.display());
    let options = ImportOptions {
        scales: args.scales.clone(),
        overwrite: args.overwrite,
    };
    let report = import_directory(&mut archive, &args.dir, &options)
        .with_context(|| format!("Failed to import {}", args.dir.display()))?;

    println!("  Views:       {}", report.views);
    if !args.scales.is_empty() {
        println!("  Rescaled:    {}", report.rescaled);
    }
    println!("  Transforms:  {}", report.transforms);
    if report.resampled > 0 {
        println!("  Resampled:   {}", report.resampled);
    }
    if !report.skipped.is_empty() {
        println!("  Skipped:     {}", report.skipped.len());
        for skipped in &report.skipped {
            println!("    {} ({})", skipped.path.display(), skipped.reason);
        }
    }

    archive.close()?;
    Ok(())
}
