//! Raw upload cache port
//!
//! Holds the uploaded bytes between parse and commit. Entries expire after a
//! time-to-live; an expired entry is reported as absent and the caller must
//! ask for the file again.

use crate::domain::result::Result;

pub trait RawBytesCache: Send + Sync {
    fn put(&self, import_id: i64, bytes: &[u8]) -> Result<()>;

    /// `None` when the entry is missing or older than the TTL
    fn get(&self, import_id: i64) -> Result<Option<Vec<u8>>>;

    fn remove(&self, import_id: i64) -> Result<()>;

    /// Drop expired entries, returning how many were removed
    fn purge_expired(&self) -> Result<usize>;
}
