//! Import service - two-phase CSV import (parse and review, then commit)

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::adapters::duckdb::{DuckDbRepository, ImportDraft};
use crate::config::MatchingSettings;
use crate::domain::{
    transfer_group_token, Account, CommitDecisions, CommitSummary, Error, ImportLog,
    ImportRecord, ImportStatus, Institution, Mapper, MappingSchema, NewTransaction,
    NormalizedRow, ParseError, ReviewSnapshot,
};
use crate::ports::{ArchiveEntry, Archiver, RawBytesCache};
use crate::services::duplicates::DuplicateDetector;
use crate::services::logging::{LogEvent, LoggingService};
use crate::services::normalize::{normalize, read_table};
use crate::services::transfers::TransferDetector;

/// Outcome of the parse phase
#[derive(Debug, Clone)]
pub struct ParsedImport {
    pub record: ImportRecord,
    pub raw_bytes: Vec<u8>,
    pub review: ReviewSnapshot,
}

/// First rows of a file read through a candidate schema
#[derive(Debug, Clone, Serialize)]
pub struct MappingPreview {
    pub headers: Vec<String>,
    pub rows: Vec<NormalizedRow>,
    pub errors: Vec<ParseError>,
}

/// Hex SHA-256 of the raw upload
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Normalized rows and dropped lines of one file
fn parse_rows(bytes: &[u8], schema: &MappingSchema) -> Result<(Vec<NormalizedRow>, Vec<ParseError>)> {
    let table = read_table(bytes)?;
    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (line, result) in normalize(&table, schema) {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!(line, reason = %e, "dropped CSV row");
                errors.push(ParseError {
                    line,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok((rows, errors))
}

pub struct ImportService {
    repository: Arc<DuckDbRepository>,
    cache: Arc<dyn RawBytesCache>,
    logger: Option<Arc<LoggingService>>,
    duplicates: DuplicateDetector,
    transfers: TransferDetector,
}

impl ImportService {
    pub fn new(
        repository: Arc<DuckDbRepository>,
        cache: Arc<dyn RawBytesCache>,
        matching: &MatchingSettings,
    ) -> Self {
        Self {
            repository,
            cache,
            logger: None,
            duplicates: DuplicateDetector::new(matching.secondary_duplicate_window_days),
            transfers: TransferDetector::new(matching.transfer_window_days),
        }
    }

    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    fn log(&self, event: LogEvent) {
        if let Some(logger) = &self.logger {
            let _ = logger.log(event);
        }
    }

    /// Read the first `limit` rows through `schema` without touching the database
    pub fn preview(&self, bytes: &[u8], schema: &MappingSchema, limit: usize) -> Result<MappingPreview> {
        let table = read_table(bytes)?;
        let mut rows = Vec::new();
        let mut errors = Vec::new();

        for (line, result) in normalize(&table, schema).take(limit) {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => errors.push(ParseError {
                    line,
                    reason: e.to_string(),
                }),
            }
        }

        Ok(MappingPreview {
            headers: table.headers.clone(),
            rows,
            errors,
        })
    }

    /// Parse a file, classify its rows and store the review.
    ///
    /// Re-running with the same bytes against the same account updates the
    /// existing import instead of creating another one.
    pub fn run_import(
        &self,
        bytes: &[u8],
        filename: &str,
        institution: &Institution,
        account: &Account,
        mapper: &Mapper,
    ) -> Result<ParsedImport> {
        if account.institution_id != institution.id {
            return Err(Error::validation(format!(
                "account {} does not belong to institution {}",
                account.id, institution.id
            ))
            .into());
        }
        if mapper.institution_id != institution.id {
            return Err(Error::validation(format!(
                "mapper {} belongs to institution {}, not {}",
                mapper.id, mapper.institution_id, institution.id
            ))
            .into());
        }

        let sha256 = content_hash(bytes);
        let (rows, parse_errors) = parse_rows(bytes, &mapper.schema)?;
        let row_count = rows.len();

        let (record, review) = self.repository.transaction(|s| {
            let report = self.duplicates.detect(s, account.id, rows)?;
            let transfer_candidates = self.transfers.detect(s, account.id, &report.to_insert)?;

            let review = ReviewSnapshot {
                to_insert: report.to_insert,
                dup_exact: report.dup_exact,
                dup_secondary: report.dup_secondary,
                transfer_candidates,
                row_count,
                parse_errors,
            };
            let log = ImportLog::new(review);

            let record = s.upsert_import(&ImportDraft {
                institution_id: institution.id,
                account_id: account.id,
                mapper_id: Some(mapper.id),
                original_filename: filename,
                original_sha256: &sha256,
                log: &log,
                row_count,
                duplicate_count: log.review.duplicate_count(),
                error_count: log.review.parse_errors.len(),
            })?;
            Ok((record, log.review))
        })?;

        tracing::info!(
            import_id = record.id,
            rows = row_count,
            new = review.to_insert.len(),
            duplicates = review.duplicate_count(),
            transfers = review.transfer_candidates.len(),
            errors = review.parse_errors.len(),
            "parsed import"
        );
        self.log(LogEvent::new("import_parsed").with_import(record.id).with_rows(row_count));

        Ok(ParsedImport {
            record,
            raw_bytes: bytes.to_vec(),
            review,
        })
    }

    /// `run_import`, then hold the raw bytes in the cache until commit
    pub fn stage_import(
        &self,
        bytes: &[u8],
        filename: &str,
        institution: &Institution,
        account: &Account,
        mapper: &Mapper,
    ) -> Result<ParsedImport> {
        let parsed = self.run_import(bytes, filename, institution, account, mapper)?;
        self.cache.put(parsed.record.id, &parsed.raw_bytes)?;

        let purged = self.cache.purge_expired()?;
        if purged > 0 {
            tracing::debug!(purged, "purged expired upload cache entries");
        }
        Ok(parsed)
    }

    /// Apply the user's decisions to a parsed import and write it out.
    ///
    /// Inserts, revivals, archival and the bookkeeping update succeed or fail
    /// together; on failure the import stays `partial`.
    pub fn commit_import(
        &self,
        record: &ImportRecord,
        raw_bytes: &[u8],
        archiver: &dyn Archiver,
        institution_name: &str,
        account_name: &str,
        decisions: &CommitDecisions,
    ) -> Result<CommitSummary> {
        let mut archived: Option<String> = None;

        let result = self.repository.transaction(|s| {
            let current = s
                .get_import(record.id)?
                .ok_or_else(|| Error::not_found(format!("import {}", record.id)))?;
            if current.status != ImportStatus::Partial {
                return Err(Error::validation(format!(
                    "import {} is {}; only partial imports can be committed",
                    current.id, current.status
                ))
                .into());
            }
            let sha256 = content_hash(raw_bytes);
            if sha256 != current.original_sha256 {
                return Err(Error::validation(format!(
                    "raw bytes do not match import {}; re-upload the original file",
                    current.id
                ))
                .into());
            }

            let review = &current.log.review;
            let mut pending: Vec<(Option<usize>, &NormalizedRow)> =
                review.to_insert.iter().enumerate().map(|(i, row)| (Some(i), row)).collect();

            for &index in &decisions.accepted_secondary_duplicates {
                match review.dup_secondary.get(index) {
                    Some(pair) => pending.push((None, &pair.new)),
                    None => tracing::debug!(index, "ignoring out-of-range secondary duplicate"),
                }
            }

            let mut revived = 0;
            if decisions.revive_deleted {
                let mut remaining = Vec::with_capacity(pending.len());
                for (new_index, row) in pending {
                    match s.find_deleted_exact(current.account_id, row)? {
                        Some(id) => {
                            s.revive_transaction(id, current.id)?;
                            revived += 1;
                        }
                        None => remaining.push((new_index, row)),
                    }
                }
                pending = remaining;
            }

            let candidates: BTreeSet<usize> =
                review.transfer_candidates.iter().map(|c| c.new_index).collect();
            for index in decisions.accepted_transfers.difference(&candidates) {
                tracing::debug!(index, "ignoring transfer confirmation for a non-candidate row");
            }

            let mut inserted = 0;
            let mut tagged = BTreeSet::new();
            for (new_index, row) in pending {
                let mut tx = NewTransaction::imported(current.account_id, current.id, row.clone());
                if let Some(i) = new_index.filter(|i| {
                    candidates.contains(i) && decisions.accepted_transfers.contains(i)
                }) {
                    tx = tx.as_transfer(transfer_group_token(current.id, row));
                    tagged.insert(i);
                }
                s.insert_transaction(&tx)?;
                inserted += 1;
            }

            let now = Utc::now();
            let path = archiver
                .store(&ArchiveEntry {
                    institution_name,
                    account_name,
                    filename: &current.original_filename,
                    sha256: &sha256,
                    bytes: raw_bytes,
                    archived_at: now,
                })
                .map_err(|e| match e {
                    Error::Archive(_) => e,
                    other => Error::archive(other.to_string()),
                })?;
            archived = Some(path.clone());

            let summary = CommitSummary {
                inserted,
                revived,
                row_count: review.row_count,
                duplicate_count_at_parse: review.duplicate_count(),
                accepted_transfers: tagged.into_iter().collect(),
            };
            let error_count = review.parse_errors.len();
            let mut log = current.log.clone();
            log.record_commit(now, summary.clone());
            s.complete_import(current.id, summary.added(), error_count, &path, &log)?;

            Ok(summary)
        });

        match result {
            Ok(summary) => {
                tracing::info!(
                    import_id = record.id,
                    inserted = summary.inserted,
                    revived = summary.revived,
                    "committed import"
                );
                self.log(
                    LogEvent::new("import_committed")
                        .with_import(record.id)
                        .with_rows(summary.added()),
                );
                Ok(summary)
            }
            Err(e) => {
                if let Some(path) = archived {
                    if let Err(discard) = archiver.discard(&path) {
                        tracing::warn!(path = %path, error = %discard, "failed to remove archive after rollback");
                    }
                }
                self.log(
                    LogEvent::new("import_commit_failed")
                        .with_import(record.id)
                        .with_error(e.to_string())
                        .with_error_details(format!("{:#}", e)),
                );
                Err(e)
            }
        }
    }

    /// Commit using the bytes held in the upload cache
    pub fn commit_from_cache(
        &self,
        import_id: i64,
        archiver: &dyn Archiver,
        decisions: &CommitDecisions,
    ) -> Result<CommitSummary> {
        let record = self
            .repository
            .get_import(import_id)?
            .ok_or_else(|| Error::not_found(format!("import {}", import_id)))?;
        let raw_bytes = self
            .cache
            .get(import_id)?
            .ok_or(Error::CacheExpired(import_id))?;

        let (institution, account) = self.repository.session(|s| {
            let institution = s
                .get_institution(record.institution_id)?
                .ok_or_else(|| Error::not_found(format!("institution {}", record.institution_id)))?;
            let account = s
                .get_account(record.account_id)?
                .ok_or_else(|| Error::not_found(format!("account {}", record.account_id)))?;
            Ok((institution, account))
        })?;

        let summary = self.commit_import(
            &record,
            &raw_bytes,
            archiver,
            &institution.name,
            &account.name,
            decisions,
        )?;
        if let Err(e) = self.cache.remove(import_id) {
            tracing::warn!(import_id, error = %e, "committed import but could not evict cached upload");
        }
        Ok(summary)
    }

    /// Soft-delete every live transaction of the import and mark it retracted.
    /// The record and its archived file are kept.
    pub fn retract_import(&self, import_id: i64) -> Result<usize> {
        let deleted = self.repository.transaction(|s| {
            if s.get_import(import_id)?.is_none() {
                return Err(Error::not_found(format!("import {}", import_id)).into());
            }
            let deleted = s.soft_delete_import_transactions(import_id)?;
            s.set_import_status(import_id, ImportStatus::Retracted)?;
            Ok(deleted)
        })?;

        tracing::info!(import_id, deleted, "retracted import");
        self.log(LogEvent::new("import_retracted").with_import(import_id).with_rows(deleted));
        Ok(deleted)
    }

    pub fn get_import(&self, import_id: i64) -> Result<Option<ImportRecord>> {
        self.repository.get_import(import_id)
    }

    /// Newest first
    pub fn list_imports(&self, limit: usize) -> Result<Vec<ImportRecord>> {
        self.repository.list_imports(limit)
    }
}
