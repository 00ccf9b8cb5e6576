use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use seccloud_core::{CloudStore, DeleteTask, KeyRepository, SliceMetadata, WorkerPool, delete_slices};
use tracing::{info, instrument};

use crate::workspace::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Content ids to delete
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Only delete from this store (default: every store)
    #[arg(short, long)]
    pub store: Option<String>,

    /// Also delete the content keys once every copy is gone
    #[arg(long)]
    pub purge_keys: bool,
}

#[instrument(level = "info", name = "cmd::rm", skip_all, fields(ids = args.ids.len(), purge = args.purge_keys))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let stores: Vec<Arc<dyn CloudStore>> = match &args.store {
        Some(name) => vec![workspace.remote(name, false)?],
        None => {
            let registry = workspace.registry()?;
            registry.names().iter().filter_map(|n| registry.get(n)).collect()
        }
    };
    if stores.is_empty() {
        bail!("No stores found");
    }

    let tasks: Vec<DeleteTask> = stores
        .iter()
        .flat_map(|store| {
            args.ids.iter().map(move |id| {
                DeleteTask::new(SliceMetadata::new(id.as_str(), store.name()), Arc::clone(store))
            })
        })
        .collect();

    let pool = WorkerPool::new()?;
    let report = delete_slices(&pool, tasks);
    pool.wait();

    for slice in &report.failed {
        eprintln!("Failed to delete {slice}");
    }
    println!(
        "Deleted {} slice(s), {} failed",
        report.succeeded.len(),
        report.failed.len()
    );
    if !report.is_complete() {
        bail!("{} slice deletion(s) failed", report.failed.len());
    }

    // Keys go last: a key is only useless once no store holds its content.
    if args.purge_keys {
        let keys = workspace.keys()?;
        for id in &args.ids {
            if keys.delete(id).with_context(|| format!("Failed to delete key of '{id}'"))? {
                info!(id = %id, "Key purged");
            }
        }
    }
    Ok(())
}
