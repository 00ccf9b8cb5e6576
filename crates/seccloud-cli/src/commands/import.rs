use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use seccloud_core::KeyRetention;
use seccloud_fs::{
    CloudFileFactory, FileHandle, FileHandleRegistry, FileMetadata, MemoryMetadataRepository,
};
use tracing::{debug, instrument};

use super::{DEFAULT_STORE, normalize_path};
use crate::workspace::Workspace;

const COPY_BUFFER: usize = 64 * 1024;

#[derive(ClapArgs)]
pub struct Args {
    /// Local file to copy in
    pub source: PathBuf,

    /// Destination path in the file layer
    pub path: String,

    /// Backing store
    #[arg(short, long, default_value = DEFAULT_STORE)]
    pub store: String,

    /// File-layer configuration (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for the final upload
    #[arg(long, default_value_t = 60)]
    pub flush_timeout: u64,
}

#[instrument(level = "info", name = "cmd::import", skip_all, fields(path = %args.path))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let config = workspace.fs_config(args.config.as_deref())?;
    let store = workspace.encrypted(&args.store, true, KeyRetention::Retain)?;
    let factory = CloudFileFactory::new(
        config.clone(),
        Arc::new(store),
        Arc::new(MemoryMetadataRepository::new()),
    )?;
    let handles = FileHandleRegistry::new(&config.handles);

    let file = factory.open(FileMetadata::file(path.as_str()).into_shared())?;
    file.create_content()?;
    let data_id = file.data_id();
    let id = handles.register(FileHandle::open(Arc::clone(&file))?);

    let mut source = File::open(&args.source)
        .with_context(|| format!("Failed to open {}", args.source.display()))?;
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut offset = 0u64;
    {
        let handle = handles
            .get(id)
            .context("Handle evicted while importing")?;
        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            handle.content().write_all_at(&buf[..n], offset)?;
            offset += n as u64;
        }
    }
    debug!(bytes = offset, "Local copy written");

    handles.destroy(id);
    let timeout = Duration::from_secs(args.flush_timeout);
    let uploaded = file.flush(timeout);
    factory.shutdown(timeout);
    if !uploaded {
        bail!("Upload of {path} did not complete within {}s", args.flush_timeout);
    }

    println!("Imported {path} ({offset} bytes) as {data_id}");
    Ok(())
}
