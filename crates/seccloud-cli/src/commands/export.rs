use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use seccloud_core::KeyRetention;
use seccloud_fs::{
    CloudFileFactory, FileHandle, FileHandleRegistry, FileMetadata, MemoryMetadataRepository,
};
use tracing::instrument;

use super::{DEFAULT_STORE, normalize_path};
use crate::workspace::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Path in the file layer
    pub path: String,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Backing store
    #[arg(short, long, default_value = DEFAULT_STORE)]
    pub store: String,

    /// File-layer configuration (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[instrument(level = "info", name = "cmd::export", skip_all, fields(path = %args.path))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let config = workspace.fs_config(args.config.as_deref())?;
    let store = workspace.encrypted(&args.store, false, KeyRetention::Retain)?;
    let factory = CloudFileFactory::new(
        config.clone(),
        Arc::new(store),
        Arc::new(MemoryMetadataRepository::new()),
    )?;

    let file = factory.open(FileMetadata::file(path.as_str()).into_shared())?;
    file.fetch_content()
        .with_context(|| format!("Failed to fetch {path}"))?;
    let handles = FileHandleRegistry::new(&config.handles);
    let id = handles.register(FileHandle::open(file)?);
    let data = handles
        .get(id)
        .context("Handle evicted while exporting")?
        .content()
        .read_to_vec()?;
    handles.destroy(id);
    factory.shutdown(Duration::from_secs(5));

    match &args.output {
        Some(out) => fs::write(out, &data)
            .with_context(|| format!("Failed to write {}", out.display()))?,
        None => io::stdout().write_all(&data)?,
    }
    Ok(())
}
