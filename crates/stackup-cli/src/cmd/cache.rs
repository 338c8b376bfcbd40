use clap::Subcommand;
use stackup_core::cache::{ActionCache, CacheEntry};
use stackup_core::config::StackConfig;
use stackup_core::paths;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Subcommand)]
pub enum CacheSubcommand {
    /// List completed one-time actions, oldest first
    List,
}

pub fn run(config: &StackConfig, subcommand: CacheSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        CacheSubcommand::List => list(config, json),
    }
}

fn list(config: &StackConfig, json: bool) -> anyhow::Result<()> {
    let path = paths::action_cache_path(config);
    // Listing never creates a cache on an unprovisioned volume.
    let entries = if path.exists() {
        ActionCache::open(&path)?.entries()?
    } else {
        Vec::new()
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No completed actions.");
        return Ok(());
    }
    print!("{}", render_table(&entries));
    Ok(())
}

/// Two columns; the timestamp column has a fixed width.
fn render_table(entries: &[CacheEntry]) -> String {
    let width = "YYYY-MM-DD HH:MM:SS".len();
    let mut out = format!("{:width$}  ACTION\n", "COMPLETED");
    out.push_str(&format!("{}  {}\n", "-".repeat(width), "-".repeat(6)));
    for entry in entries {
        out.push_str(&format!(
            "{}  {}\n",
            entry.completed_at.format(TIMESTAMP_FORMAT),
            entry.action
        ));
    }
    out
}
