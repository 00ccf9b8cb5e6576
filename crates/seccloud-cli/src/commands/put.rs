use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use seccloud_core::{CloudStore, KeyRetention};
use tracing::instrument;

use super::DEFAULT_STORE;
use crate::workspace::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Content id to store under
    pub id: String,

    /// Local file to upload ("-" reads stdin)
    pub file: PathBuf,

    /// Target store
    #[arg(short, long, default_value = DEFAULT_STORE)]
    pub store: String,
}

#[instrument(level = "info", name = "cmd::put", skip_all, fields(id = %args.id, store = %args.store))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let store = workspace.encrypted(&args.store, true, KeyRetention::Retain)?;

    let (stored, length) = if args.file.as_os_str() == "-" {
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data).context("Failed to read stdin")?;
        let length = data.len() as u64;
        (store.upload(&args.id, &mut Cursor::new(data), length)?, length)
    } else {
        let mut file = File::open(&args.file)
            .with_context(|| format!("Failed to open {}", args.file.display()))?;
        let length = file.metadata()?.len();
        (store.upload(&args.id, &mut file, length)?, length)
    };

    println!("Stored '{}' in {} ({length} bytes, {stored} encrypted)", args.id, args.store);
    Ok(())
}
