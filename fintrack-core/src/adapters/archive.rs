//! Gzip file archive for committed imports
//!
//! Layout: `<root>/<institution>/<account>/<YYYY>/<MM>/<YYYYmmddTHHMMSS>_<sha8>_<filename>.gz`

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::domain::result::Result;
use crate::ports::{ArchiveEntry, Archiver};

pub struct GzipArchiver {
    root: PathBuf,
}

impl GzipArchiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path for an entry, always `/`-separated
    pub fn relative_path(entry: &ArchiveEntry<'_>) -> String {
        let at = entry.archived_at;
        let sha8: String = entry.sha256.chars().take(8).collect();
        format!(
            "{}/{}/{}/{}/{}_{}_{}.gz",
            sanitize(entry.institution_name),
            sanitize(entry.account_name),
            at.format("%Y"),
            at.format("%m"),
            at.format("%Y%m%dT%H%M%S"),
            sha8,
            sanitize(entry.filename),
        )
    }

    /// Decompress an archived file
    pub fn read(&self, relative_path: &str) -> Result<Vec<u8>> {
        let file = fs::File::open(self.root.join(relative_path))?;
        let mut bytes = Vec::new();
        GzDecoder::new(file).read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl Archiver for GzipArchiver {
    fn store(&self, entry: &ArchiveEntry<'_>) -> Result<String> {
        let relative = Self::relative_path(entry);
        let full = self.root.join(&relative);
        let dir = full
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "archive path has no parent"))?;
        fs::create_dir_all(dir)?;

        // Write next to the target, then rename into place
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
            encoder.write_all(entry.bytes)?;
            encoder.finish()?;
        }
        tmp.persist(&full).map_err(|e| e.error)?;

        tracing::debug!(path = %relative, bytes = entry.bytes.len(), "archived import file");
        Ok(relative)
    }

    fn discard(&self, relative_path: &str) -> Result<()> {
        match fs::remove_file(self.root.join(relative_path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Make a name safe to use as a single path component
fn sanitize(name: &str) -> String {
    let cleaned = name.trim().replace(['/', '\\'], "_");
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn entry<'a>(bytes: &'a [u8], filename: &'a str) -> ArchiveEntry<'a> {
        ArchiveEntry {
            institution_name: "First/Bank",
            account_name: "Checking",
            filename,
            sha256: "0123456789abcdef",
            bytes,
            archived_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 6).unwrap(),
        }
    }

    #[test]
    fn test_relative_path_layout() {
        let path = GzipArchiver::relative_path(&entry(b"", "march.csv"));
        assert_eq!(path, "First_Bank/Checking/2024/03/20240309T140506_01234567_march.csv.gz");
    }

    #[test]
    fn test_store_and_read_back() {
        let dir = tempdir().unwrap();
        let archiver = GzipArchiver::new(dir.path());
        let bytes = b"Date,Description,Amount\n01/02/2024,COFFEE SHOP,-4.50\n";

        let relative = archiver.store(&entry(bytes, "../export.csv")).unwrap();
        assert!(relative.ends_with("_.._export.csv.gz"));
        assert!(dir.path().join(&relative).exists());
        assert_eq!(archiver.read(&relative).unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_discard_is_idempotent() {
        let dir = tempdir().unwrap();
        let archiver = GzipArchiver::new(dir.path());
        let relative = archiver.store(&entry(b"x", "a.csv")).unwrap();

        archiver.discard(&relative).unwrap();
        assert!(!dir.path().join(&relative).exists());
        archiver.discard(&relative).unwrap();
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a/b\\c"), "a_b_c");
        assert_eq!(sanitize(".."), "_");
        assert_eq!(sanitize("  "), "_");
    }
}
