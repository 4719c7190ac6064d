//! vxr: inspect region files from the command line.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use region::RegionFile;

mod inspect;

#[derive(Parser)]
#[command(name = "vxr", about = "Inspect vxr voxel region files")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the header and occupancy of a region file.
    Info { file: PathBuf },
    /// List present blocks with their sector ranges.
    Blocks { file: PathBuf },
}

fn open_region(path: &Path) -> Result<RegionFile> {
    let mut r = RegionFile::new();
    r.open(path, false)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(r)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Info { file } => {
            let r = open_region(&file)?;
            let file_len = fs::metadata(&file)?.len();
            print!("{}", inspect::format_info(&r, file_len));
        }
        Command::Blocks { file } => {
            let r = open_region(&file)?;
            print!("{}", inspect::format_blocks(&r));
        }
    }
    Ok(())
}
