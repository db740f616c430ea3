//! CLI command implementations

pub mod account;
pub mod config;
pub mod import;
pub mod institution;
pub mod logs;
pub mod mapper;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use fintrack_core::{EntryPoint, FintrackContext, LoggingService};

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<Arc<LoggingService>> {
    let data_dir = get_data_dir().ok()?;
    std::fs::create_dir_all(&data_dir).ok()?;
    LoggingService::new(&data_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))
        .ok()
        .map(Arc::new)
}

/// Data directory from `FINTRACK_DIR`, else `~/.fintrack`
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("FINTRACK_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".fintrack"))
        .ok_or_else(|| anyhow!("Could not find home directory; set FINTRACK_DIR"))
}

/// Open the context for `command`, recording the command in the event log
pub fn get_context(command: &str) -> Result<FintrackContext> {
    let data_dir = get_data_dir()?;
    let logger = get_logger();
    // Logging never blocks a command
    if let Some(l) = &logger {
        let _ = l.log_command(command);
    }

    match logger {
        Some(logger) => FintrackContext::with_logger(&data_dir, logger),
        None => FintrackContext::new(&data_dir),
    }
    .context("Failed to initialize fintrack context")
}

/// Parse a comma-separated index list such as `0,2,5`
pub fn parse_index_list(raw: &str) -> Result<Vec<usize>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .with_context(|| format!("'{}' is not a valid row index", s))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index_list() {
        assert_eq!(parse_index_list("0, 2,5,").unwrap(), vec![0, 2, 5]);
        assert!(parse_index_list("").unwrap().is_empty());
        assert!(parse_index_list("1,x").is_err());
    }
}
