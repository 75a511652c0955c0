use crate::app::replay::replay_file;
use crate::cli::commands::{Cli, Commands};
use anyhow::Result;
use iris_workspaces::StoreConfig;
use std::path::Path;
use tracing::info;

fn resolve_config(path: Option<&Path>) -> Result<StoreConfig> {
    match path {
        Some(path) => StoreConfig::load(path),
        None => StoreConfig::load_or_default(&StoreConfig::default_path()),
    }
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Replay { events, config } => {
            let config = resolve_config(config.as_deref())?;
            let report = replay_file(&events, config).await?;
            info!(
                events = report.events,
                skipped = report.skipped_lines,
                workspaces = report.workspaces.len(),
                "Replay finished"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let path = config.unwrap_or_else(StoreConfig::default_path);
            let config = StoreConfig::load(&path)?;
            println!("Config OK: {}", path.display());
            println!(
                "  buffer.max_pending_events = {}",
                config.buffer.max_pending_events
            );
            println!(
                "  compaction.max_extraction_attempts = {}",
                config.compaction.max_extraction_attempts
            );
            println!(
                "  compaction.truncation_sentinel = {:?}",
                config.compaction.truncation_sentinel
            );
            println!("  notices.capacity = {}", config.notices.capacity);
            Ok(())
        }
    }
}
