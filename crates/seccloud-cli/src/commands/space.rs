use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use tracing::{instrument, warn};

use crate::workspace::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::space", skip_all)]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let registry = workspace.registry()?;

    let mut rows = Vec::new();
    for name in registry.names() {
        let Some(store) = registry.get(&name) else {
            continue;
        };
        match (store.total_space(), store.available_space()) {
            (Ok(total), Ok(available)) => rows.push((name, total, available)),
            (Err(e), _) | (_, Err(e)) => warn!(store = %name, error = %e, "Space query failed"),
        }
    }

    if args.json {
        let stores: Vec<_> = rows
            .iter()
            .map(|(name, total, available)| {
                serde_json::json!({ "store": name, "total": total, "available": available })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&stores)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Store", "Total", "Available"]);
    for (name, total, available) in &rows {
        table.add_row(vec![name.clone(), format_size(*total), format_size(*available)]);
    }
    println!("{table}");
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }
}
