//! Raw upload caches
//!
//! - `MemoryRawCache` for a long-lived process (and tests)
//! - `FileRawCache` for the CLI, where parse and commit run as separate processes

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::domain::result::{Error, Result};
use crate::ports::RawBytesCache;

/// In-process cache keyed by import id
pub struct MemoryRawCache {
    ttl: Duration,
    entries: Mutex<HashMap<i64, (Instant, Vec<u8>)>>,
}

impl MemoryRawCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<i64, (Instant, Vec<u8>)>>> {
        self.entries
            .lock()
            .map_err(|e| Error::Other(format!("Lock poisoned: {}", e)))
    }
}

impl RawBytesCache for MemoryRawCache {
    fn put(&self, import_id: i64, bytes: &[u8]) -> Result<()> {
        self.entries()?.insert(import_id, (Instant::now(), bytes.to_vec()));
        Ok(())
    }

    fn get(&self, import_id: i64) -> Result<Option<Vec<u8>>> {
        let entries = self.entries()?;
        Ok(entries
            .get(&import_id)
            .filter(|(stored_at, _)| stored_at.elapsed() <= self.ttl)
            .map(|(_, bytes)| bytes.clone()))
    }

    fn remove(&self, import_id: i64) -> Result<()> {
        self.entries()?.remove(&import_id);
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() <= self.ttl);
        Ok(before - entries.len())
    }
}

/// One file per import under a cache directory, expired by modification time
pub struct FileRawCache {
    dir: PathBuf,
    ttl: Duration,
}

impl FileRawCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    fn entry_path(&self, import_id: i64) -> PathBuf {
        self.dir.join(format!("import-{}.raw", import_id))
    }

    /// Lock file shared by every process using this cache directory.
    /// Released when the returned handle is dropped.
    fn lock(&self, exclusive: bool) -> Result<File> {
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(".lock"))?;
        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(file)
    }

    fn is_expired(&self, path: &Path) -> io::Result<bool> {
        let modified = fs::metadata(path)?.modified()?;
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        Ok(age > self.ttl)
    }
}

impl RawBytesCache for FileRawCache {
    fn put(&self, import_id: i64, bytes: &[u8]) -> Result<()> {
        let _lock = self.lock(true)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(self.entry_path(import_id)).map_err(|e| e.error)?;
        Ok(())
    }

    fn get(&self, import_id: i64) -> Result<Option<Vec<u8>>> {
        let _lock = self.lock(false)?;
        let path = self.entry_path(import_id);
        match self.is_expired(&path) {
            Ok(false) => Ok(Some(fs::read(&path)?)),
            Ok(true) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, import_id: i64) -> Result<()> {
        let _lock = self.lock(true)?;
        match fs::remove_file(self.entry_path(import_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn purge_expired(&self) -> Result<usize> {
        let _lock = self.lock(true)?;
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_entry = path
                .extension()
                .map(|ext| ext == "raw")
                .unwrap_or(false);
            if is_entry && self.is_expired(&path)? {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_cache_put_get_remove() {
        let cache = MemoryRawCache::new(Duration::from_secs(60));
        cache.put(1, b"abc").unwrap();

        assert_eq!(cache.get(1).unwrap(), Some(b"abc".to_vec()));
        assert_eq!(cache.get(2).unwrap(), None);

        cache.remove(1).unwrap();
        assert_eq!(cache.get(1).unwrap(), None);
    }

    #[test]
    fn test_memory_cache_expiry() {
        let cache = MemoryRawCache::new(Duration::ZERO);
        cache.put(1, b"abc").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get(1).unwrap(), None);
        assert_eq!(cache.purge_expired().unwrap(), 1);
    }

    #[test]
    fn test_file_cache_put_get_remove() {
        let dir = tempdir().unwrap();
        let cache = FileRawCache::new(dir.path().join("cache"), Duration::from_secs(60));

        assert_eq!(cache.get(5).unwrap(), None);
        cache.put(5, b"Date,Amount\n").unwrap();
        assert_eq!(cache.get(5).unwrap(), Some(b"Date,Amount\n".to_vec()));

        // Visible to a second handle on the same directory
        let other = FileRawCache::new(dir.path().join("cache"), Duration::from_secs(60));
        assert!(other.get(5).unwrap().is_some());

        cache.remove(5).unwrap();
        assert_eq!(other.get(5).unwrap(), None);
        cache.remove(5).unwrap();
    }

    #[test]
    fn test_file_cache_expiry() {
        let dir = tempdir().unwrap();
        let cache = FileRawCache::new(dir.path(), Duration::ZERO);
        cache.put(9, b"x").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(cache.get(9).unwrap(), None);
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert!(!dir.path().join("import-9.raw").exists());
    }
}
