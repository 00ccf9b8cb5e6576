use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use seccloud_core::{CloudStore, KeyRetention};
use tracing::instrument;

use super::DEFAULT_STORE;
use crate::workspace::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Content id to fetch
    pub id: String,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Source store
    #[arg(short, long, default_value = DEFAULT_STORE)]
    pub store: String,
}

#[instrument(level = "info", name = "cmd::get", skip_all, fields(id = %args.id, store = %args.store))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let store = workspace.encrypted(&args.store, false, KeyRetention::Retain)?;

    // Decrypt fully before touching the destination so a failed download
    // never leaves a partial file behind.
    let mut plaintext = Vec::new();
    store.download(&args.id, &mut plaintext)?;

    match &args.output {
        Some(path) => fs::write(path, &plaintext)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => io::stdout().write_all(&plaintext)?,
    }
    Ok(())
}
