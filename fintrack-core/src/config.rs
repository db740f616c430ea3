//! Configuration management
//!
//! Settings live in `settings.json` in the data directory:
//! ```json
//! {
//!   "archiveDir": "/path/to/archive",
//!   "cacheTtlMinutes": 120,
//!   "matching": { "secondaryDuplicateWindowDays": 10, "transferWindowDays": 2 }
//! }
//! ```
//! Keys this crate does not manage are preserved on save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};
use crate::services::duplicates::SECONDARY_DUPLICATE_WINDOW_DAYS;
use crate::services::transfers::TRANSFER_WINDOW_DAYS;

const SETTINGS_FILE: &str = "settings.json";
const DEFAULT_CACHE_TTL_MINUTES: u64 = 120;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    archive_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache_ttl_minutes: Option<u64>,
    #[serde(default)]
    matching: MatchingFile,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchingFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secondary_duplicate_window_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transfer_window_days: Option<i64>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Date windows used by the duplicate and transfer detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchingSettings {
    pub secondary_duplicate_window_days: i64,
    pub transfer_window_days: i64,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            secondary_duplicate_window_days: SECONDARY_DUPLICATE_WINDOW_DAYS,
            transfer_window_days: TRANSFER_WINDOW_DAYS,
        }
    }
}

/// Fintrack configuration (resolved view of settings plus environment)
#[derive(Debug, Clone)]
pub struct Config {
    pub archive_dir: PathBuf,
    pub cache_ttl: Duration,
    pub matching: MatchingSettings,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Config {
    /// Load config from the data directory
    ///
    /// Environment overrides:
    /// - `FINTRACK_ARCHIVE_DIR`
    /// - `FINTRACK_CACHE_TTL_MINUTES`
    pub fn load(data_dir: &Path) -> Result<Self> {
        Self::load_with_env(data_dir, |key| std::env::var(key).ok())
    }

    /// Load only what settings.json holds, ignoring environment overrides
    pub fn load_file(data_dir: &Path) -> Result<Self> {
        Self::load_with_env(data_dir, |_| None)
    }

    fn load_with_env(data_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = read_settings(data_dir)?;

        let archive_dir = env("FINTRACK_ARCHIVE_DIR")
            .map(PathBuf::from)
            .or_else(|| raw.archive_dir.clone())
            .unwrap_or_else(|| data_dir.join("archive"));

        let ttl_minutes = match env("FINTRACK_CACHE_TTL_MINUTES") {
            Some(value) => value.trim().parse::<u64>().map_err(|_| {
                Error::config(format!("FINTRACK_CACHE_TTL_MINUTES must be a whole number, got '{}'", value))
            })?,
            None => raw.cache_ttl_minutes.unwrap_or(DEFAULT_CACHE_TTL_MINUTES),
        };

        let defaults = MatchingSettings::default();
        let matching = MatchingSettings {
            secondary_duplicate_window_days: raw
                .matching
                .secondary_duplicate_window_days
                .unwrap_or(defaults.secondary_duplicate_window_days),
            transfer_window_days: raw
                .matching
                .transfer_window_days
                .unwrap_or(defaults.transfer_window_days),
        };
        if matching.secondary_duplicate_window_days < 0 || matching.transfer_window_days < 0 {
            return Err(Error::config("matching windows must not be negative"));
        }

        Ok(Self {
            archive_dir,
            cache_ttl: Duration::from_secs(ttl_minutes.saturating_mul(60)),
            matching,
            _raw_settings: raw,
        })
    }

    /// Save config to the data directory
    /// Preserves other settings that fintrack doesn't manage
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        let mut settings = read_settings(data_dir)?;

        settings.archive_dir = if self.archive_dir == data_dir.join("archive") {
            None
        } else {
            Some(self.archive_dir.clone())
        };
        settings.cache_ttl_minutes = Some(self.cache_ttl.as_secs() / 60);
        settings.matching.secondary_duplicate_window_days =
            Some(self.matching.secondary_duplicate_window_days);
        settings.matching.transfer_window_days = Some(self.matching.transfer_window_days);

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}

fn read_settings(data_dir: &Path) -> Result<SettingsFile> {
    let settings_path = data_dir.join(SETTINGS_FILE);
    if !settings_path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(&settings_path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::config(format!("{}: {}", settings_path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.archive_dir, dir.path().join("archive"));
        assert_eq!(config.cache_ttl, Duration::from_secs(120 * 60));
        assert_eq!(config.matching, MatchingSettings::default());
        assert_eq!(config.matching.secondary_duplicate_window_days, 10);
        assert_eq!(config.matching.transfer_window_days, 2);
    }

    #[test]
    fn test_file_values_and_env_override() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"archiveDir":"/srv/archive","cacheTtlMinutes":5,"matching":{"transferWindowDays":3}}"#,
        )
        .unwrap();

        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.archive_dir, PathBuf::from("/srv/archive"));
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.matching.transfer_window_days, 3);
        assert_eq!(config.matching.secondary_duplicate_window_days, 10);

        let config = Config::load_with_env(dir.path(), |key| match key {
            "FINTRACK_ARCHIVE_DIR" => Some("/elsewhere".to_string()),
            "FINTRACK_CACHE_TTL_MINUTES" => Some("1".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.archive_dir, PathBuf::from("/elsewhere"));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let err = Config::load_with_env(dir.path(), |key| {
            (key == "FINTRACK_CACHE_TTL_MINUTES").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"matching":{"secondaryDuplicateWindowDays":-1}}"#,
        )
        .unwrap();
        assert!(matches!(Config::load_with_env(dir.path(), no_env), Err(Error::Config(_))));

        std::fs::write(dir.path().join(SETTINGS_FILE), "{not json").unwrap();
        assert!(matches!(Config::load_with_env(dir.path(), no_env), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"theme":"dark","matching":{"fuzzyNames":true}}"#,
        )
        .unwrap();

        let mut config = Config::load_with_env(dir.path(), no_env).unwrap();
        config.matching.transfer_window_days = 4;
        config.save(dir.path()).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap()).unwrap();
        assert_eq!(saved["theme"], "dark");
        assert_eq!(saved["matching"]["fuzzyNames"], true);
        assert_eq!(saved["matching"]["transferWindowDays"], 4);
        assert!(saved.get("archiveDir").is_none());

        let reloaded = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(reloaded.matching.transfer_window_days, 4);
    }

    #[test]
    fn test_file_config_saved_without_env_values() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), r#"{"cacheTtlMinutes":30}"#).unwrap();

        let mut config = Config::load_file(dir.path()).unwrap();
        assert_eq!(config.archive_dir, dir.path().join("archive"));
        assert_eq!(config.cache_ttl, Duration::from_secs(30 * 60));

        config.matching.secondary_duplicate_window_days = 7;
        config.save(dir.path()).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap()).unwrap();
        assert_eq!(saved["cacheTtlMinutes"], 30);
        assert_eq!(saved["matching"]["secondaryDuplicateWindowDays"], 7);
        assert!(saved.get("archiveDir").is_none());
    }
}
