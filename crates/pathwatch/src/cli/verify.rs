use anyhow::{Context, Result};
use atlas_pathwatch::artifacts::shard::verify_shard;
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

/// Check that a shard file decompresses and parses end to end
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Shard file to verify
    pub file: PathBuf,

    /// Delete the file if it is broken
    #[arg(short, long)]
    pub delete: bool,
}

pub fn handle(args: VerifyArgs) -> Result<()> {
    match verify_shard(&args.file) {
        Ok(count) => {
            info!("{}: OK ({count} traceroutes)", args.file.display());
        }
        Err(e) => {
            warn!("{}: broken: {e}", args.file.display());
            if args.delete {
                std::fs::remove_file(&args.file)
                    .with_context(|| format!("Failed to delete {}", args.file.display()))?;
                info!("Deleted {}", args.file.display());
            }
        }
    }
    Ok(())
}
