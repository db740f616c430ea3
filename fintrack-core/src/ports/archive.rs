//! Raw file archive port

use chrono::{DateTime, Utc};

use crate::domain::result::Result;

/// A raw import file to be kept for provenance
#[derive(Debug, Clone, Copy)]
pub struct ArchiveEntry<'a> {
    pub institution_name: &'a str,
    pub account_name: &'a str,
    pub filename: &'a str,
    pub sha256: &'a str,
    pub bytes: &'a [u8],
    pub archived_at: DateTime<Utc>,
}

/// Persistent storage for committed import files
pub trait Archiver: Send + Sync {
    /// Store the entry and return its path relative to the archive root
    fn store(&self, entry: &ArchiveEntry<'_>) -> Result<String>;

    /// Delete a previously stored file. Used when the surrounding commit fails.
    fn discard(&self, relative_path: &str) -> Result<()>;
}
