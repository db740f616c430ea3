//! Config command - show and change settings.json

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Subcommand};
use fintrack_core::config::Config;

use super::{get_data_dir, get_logger};
use crate::output;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective settings, environment overrides included
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change settings stored in settings.json
    #[command(group(
        ArgGroup::new("setting")
            .required(true)
            .multiple(true)
            .args(["archive_dir", "cache_ttl_minutes", "duplicate_window_days", "transfer_window_days"])
    ))]
    Set {
        /// Where committed uploads are archived
        #[arg(long)]
        archive_dir: Option<PathBuf>,
        /// How long a staged upload stays committable
        #[arg(long)]
        cache_ttl_minutes: Option<u64>,
        /// Half-width of the secondary duplicate window
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
        duplicate_window_days: Option<i64>,
        /// Half-width of the transfer matching window
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
        transfer_window_days: Option<i64>,
    },
}

pub fn run(command: ConfigCommands) -> Result<()> {
    let data_dir = get_data_dir()?;

    match command {
        ConfigCommands::Show { json } => {
            let config = Config::load(&data_dir)?;
            if json {
                let value = serde_json::json!({
                    "archiveDir": config.archive_dir,
                    "cacheTtlMinutes": config.cache_ttl.as_secs() / 60,
                    "secondaryDuplicateWindowDays": config.matching.secondary_duplicate_window_days,
                    "transferWindowDays": config.matching.transfer_window_days,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Setting", "Value"]);
            table.add_row(vec!["Archive directory".to_string(), config.archive_dir.display().to_string()]);
            table.add_row(vec!["Cache TTL (minutes)".to_string(), (config.cache_ttl.as_secs() / 60).to_string()]);
            table.add_row(vec![
                "Duplicate window (days)".to_string(),
                config.matching.secondary_duplicate_window_days.to_string(),
            ]);
            table.add_row(vec![
                "Transfer window (days)".to_string(),
                config.matching.transfer_window_days.to_string(),
            ]);
            println!("{table}");
        }
        ConfigCommands::Set {
            archive_dir,
            cache_ttl_minutes,
            duplicate_window_days,
            transfer_window_days,
        } => {
            std::fs::create_dir_all(&data_dir)?;
            if let Some(logger) = get_logger() {
                let _ = logger.log_command("config set");
            }

            let mut config = Config::load_file(&data_dir)?;
            if let Some(dir) = archive_dir {
                config.archive_dir = dir;
            }
            if let Some(minutes) = cache_ttl_minutes {
                config.cache_ttl = std::time::Duration::from_secs(minutes.saturating_mul(60));
            }
            if let Some(days) = duplicate_window_days {
                config.matching.secondary_duplicate_window_days = days;
            }
            if let Some(days) = transfer_window_days {
                config.matching.transfer_window_days = days;
            }
            config.save(&data_dir)?;

            output::success(&format!("Saved {}", data_dir.join("settings.json").display()));
        }
    }

    Ok(())
}
