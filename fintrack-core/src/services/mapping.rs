//! Header mapper - guesses and versions CSV column layouts

use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::mapping::DEFAULT_DATE_FORMAT;
use crate::domain::{AmountColumns, Mapper, MappingSchema};
use crate::services::logging::{LogEvent, LoggingService};

const DATE_HEADERS: &[&str] = &["date", "posted date", "transaction date", "posting date"];
const DESCRIPTION_HEADERS: &[&str] = &["description", "memo", "details", "name", "payee"];
const AMOUNT_HEADERS: &[&str] = &["amount", "amt", "transaction amount"];
const DEBIT_HEADERS: &[&str] = &["debit", "withdrawal", "outflow", "charge"];
const CREDIT_HEADERS: &[&str] = &["credit", "deposit", "inflow", "payment"];
const BALANCE_HEADERS: &[&str] = &["balance", "running balance", "available balance", "current balance"];
const INDICATOR_HEADERS: &[&str] = &[
    "credit debit indicator",
    "credit/debit indicator",
    "dr/cr",
    "cr/dr",
    "transaction type",
    "type",
    "debit/credit",
];

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_]").expect("valid regex"));

/// Trim, lowercase, and treat `-` and `_` as spaces
fn normalize_header(header: &str) -> String {
    SEPARATORS
        .replace_all(&header.trim().to_lowercase(), " ")
        .into_owned()
}

/// First header (left to right) whose normalized form is in `synonyms`
fn find_header(headers: &[String], normalized: &[String], synonyms: &[&str]) -> Option<String> {
    normalized
        .iter()
        .position(|n| synonyms.contains(&n.as_str()))
        .map(|i| headers[i].clone())
}

/// Best-effort schema from raw CSV headers. Never fails: fields that
/// cannot be matched are left empty.
///
/// Falls back to the first header for the date and the second (or only)
/// header for the description. Net mode is used when an amount column
/// matches, otherwise debit/credit columns are looked up.
pub fn guess_mapping(headers: &[String]) -> MappingSchema {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    let find = |synonyms: &[&str]| find_header(headers, &normalized, synonyms);

    let date_col = find(DATE_HEADERS).or_else(|| headers.first().cloned());
    let desc_col = find(DESCRIPTION_HEADERS).or_else(|| headers.get(1).or(headers.first()).cloned());

    let amount = match find(AMOUNT_HEADERS) {
        Some(amount_col) => AmountColumns::Net {
            amount_col,
            indicator_col: find(INDICATOR_HEADERS),
        },
        None => AmountColumns::Split {
            debit_col: find(DEBIT_HEADERS),
            credit_col: find(CREDIT_HEADERS),
        },
    };

    MappingSchema {
        date_col,
        date_fmt: Some(DEFAULT_DATE_FORMAT.to_string()),
        desc_col,
        amount,
        balance_col: find(BALANCE_HEADERS),
        exclude_pending: false,
    }
}

/// Stores mapping schemas as append-only versions per (institution, account)
pub struct MapperService {
    repository: Arc<DuckDbRepository>,
    logger: Option<Arc<LoggingService>>,
}

impl MapperService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self {
            repository,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Save `schema` as the next version (max existing + 1, starting at 1)
    pub fn create_version(
        &self,
        institution_id: i64,
        account_id: Option<i64>,
        schema: &MappingSchema,
    ) -> Result<Mapper> {
        let mapper = self.repository.transaction(|s| {
            let next = s.max_mapper_version(institution_id, account_id)?.unwrap_or(0) + 1;
            s.insert_mapper(institution_id, account_id, next, schema)
        })?;

        tracing::info!(mapper_id = mapper.id, version = mapper.version, "saved mapper version");
        if let Some(logger) = &self.logger {
            let _ = logger.log(LogEvent::new("mapper_saved"));
        }
        Ok(mapper)
    }

    /// Highest version stored for exactly this account and institution
    pub fn latest_for(&self, account_id: i64, institution_id: i64) -> Result<Option<Mapper>> {
        self.repository
            .session(|s| s.latest_mapper(account_id, institution_id))
    }

    pub fn get(&self, mapper_id: i64) -> Result<Option<Mapper>> {
        self.repository.session(|s| s.get_mapper(mapper_id))
    }

    pub fn list_for_account(&self, account_id: i64) -> Result<Vec<Mapper>> {
        self.repository.session(|s| s.list_mappers(account_id))
    }
}
