//! Import bookkeeping: records, review snapshots and the persisted log

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::Error;
use super::transaction::NormalizedRow;

/// Lifecycle of an import: partial until committed, then success, and
/// retracted once its transactions have been soft-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Partial,
    Success,
    Retracted,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Partial => "partial",
            ImportStatus::Success => "success",
            ImportStatus::Retracted => "retracted",
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "partial" => Ok(ImportStatus::Partial),
            "success" => Ok(ImportStatus::Success),
            "retracted" => Ok(ImportStatus::Retracted),
            other => Err(Error::validation(format!("unknown import status '{}'", other))),
        }
    }
}

/// A new row that matched an existing transaction on the same account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DuplicatePair {
    pub new: NormalizedRow,
    pub existing_id: i64,
}

/// A new outflow that may be one leg of a transfer between accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferCandidate {
    /// Position of the row in `to_insert`
    pub new_index: usize,
    pub new: NormalizedRow,
    pub existing_id: i64,
}

/// A CSV row dropped during normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParseError {
    /// 1-based line in the source file
    pub line: usize,
    pub reason: String,
}

/// What the user reviews between parse and commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewSnapshot {
    pub to_insert: Vec<NormalizedRow>,
    pub dup_exact: Vec<DuplicatePair>,
    pub dup_secondary: Vec<DuplicatePair>,
    pub transfer_candidates: Vec<TransferCandidate>,
    /// Rows successfully normalized
    pub row_count: usize,
    pub parse_errors: Vec<ParseError>,
}

impl ReviewSnapshot {
    pub fn duplicate_count(&self) -> usize {
        self.dup_exact.len() + self.dup_secondary.len()
    }
}

/// Counts recorded when an import is committed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitSummary {
    pub inserted: usize,
    pub revived: usize,
    pub row_count: usize,
    pub duplicate_count_at_parse: usize,
    /// Sorted `new_index` values of the rows tagged as transfers
    pub accepted_transfers: Vec<usize>,
}

impl CommitSummary {
    pub fn added(&self) -> usize {
        self.inserted + self.revived
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "v1")]
    V1,
}

/// Document stored in `imports.log_json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportLog {
    pub format: LogFormat,
    pub review: ReviewSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_summary: Option<CommitSummary>,
}

impl ImportLog {
    pub fn new(review: ReviewSnapshot) -> Self {
        Self {
            format: LogFormat::V1,
            review,
            committed_at: None,
            commit_summary: None,
        }
    }

    /// Parse a stored log, rejecting unknown versions and keys
    pub fn parse(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::validation(format!("invalid import log: {}", e)))
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn record_commit(&mut self, at: DateTime<Utc>, summary: CommitSummary) {
        self.committed_at = Some(at);
        self.commit_summary = Some(summary);
    }
}

/// One uploaded file against one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: i64,
    pub institution_id: i64,
    pub account_id: i64,
    pub mapper_id: Option<i64>,
    pub original_filename: String,
    /// Hex SHA-256 of the raw bytes
    pub original_sha256: String,
    /// Relative to the archive root
    pub archived_path: Option<String>,
    pub row_count: i64,
    pub added_count: i64,
    pub duplicate_count: i64,
    pub error_count: i64,
    pub status: ImportStatus,
    pub log: ImportLog,
    pub created_at: NaiveDateTime,
}

/// User decisions applied at commit time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommitDecisions {
    /// Indices into `dup_secondary` to insert anyway
    pub accepted_secondary_duplicates: BTreeSet<usize>,
    /// `new_index` values of transfer candidates to confirm
    pub accepted_transfers: BTreeSet<usize>,
    /// Un-delete soft-deleted exact matches instead of inserting
    pub revive_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(day: u32, desc: &str, cents: i64) -> NormalizedRow {
        NormalizedRow::new(NaiveDate::from_ymd_opt(2024, 2, day).unwrap(), desc, cents)
    }

    #[test]
    fn test_log_round_trip_keeps_new_index() {
        let review = ReviewSnapshot {
            to_insert: vec![row(1, "RENT", -150000), row(3, "TRANSFER OUT", -5000), row(4, "TRANSFER OUT", -7000)],
            transfer_candidates: vec![
                TransferCandidate { new_index: 2, new: row(4, "TRANSFER OUT", -7000), existing_id: 40 },
                TransferCandidate { new_index: 1, new: row(3, "TRANSFER OUT", -5000), existing_id: 41 },
            ],
            row_count: 3,
            ..Default::default()
        };
        let log = ImportLog::new(review);

        let json = log.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["format"], "v1");
        assert_eq!(value["review"]["to_insert"][0]["txn_date"], "2024-02-01");

        let parsed = ImportLog::parse(&json).unwrap();
        let indices: Vec<usize> = parsed.review.transfer_candidates.iter().map(|t| t.new_index).collect();
        assert_eq!(indices, vec![2, 1]);
        assert_eq!(parsed, log);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let json = r#"{"format":"v9","review":{"to_insert":[],"dup_exact":[],"dup_secondary":[],"transfer_candidates":[],"row_count":0,"parse_errors":[]}}"#;
        assert!(matches!(ImportLog::parse(json), Err(Error::Validation(_))));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let json = r#"{"format":"v1","surprise":true,"review":{"to_insert":[],"dup_exact":[],"dup_secondary":[],"transfer_candidates":[],"row_count":0,"parse_errors":[]}}"#;
        assert!(ImportLog::parse(json).is_err());
    }

    #[test]
    fn test_commit_summary_recorded() {
        let mut log = ImportLog::new(ReviewSnapshot::default());
        log.record_commit(
            Utc::now(),
            CommitSummary { inserted: 2, revived: 1, row_count: 3, duplicate_count_at_parse: 0, accepted_transfers: vec![0] },
        );
        let parsed = ImportLog::parse(&log.to_json().unwrap()).unwrap();
        assert_eq!(parsed.commit_summary.unwrap().added(), 3);
        assert!(parsed.committed_at.is_some());
    }

    #[test]
    fn test_decisions_defaults() {
        let decisions: CommitDecisions = serde_json::from_str(r#"{"accepted_transfers":[3,1]}"#).unwrap();
        assert!(decisions.accepted_secondary_duplicates.is_empty());
        assert!(!decisions.revive_deleted);
        assert_eq!(decisions.accepted_transfers.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [ImportStatus::Partial, ImportStatus::Success, ImportStatus::Retracted] {
            assert_eq!(status.as_str().parse::<ImportStatus>().unwrap(), status);
        }
        assert!("done".parse::<ImportStatus>().is_err());
    }
}
