//! Fintrack Core - CSV import pipeline for personal finance tracking
//!
//! This crate follows hexagonal architecture:
//!
//! - **domain**: Core entities (Account, MappingSchema, ImportRecord, ...)
//! - **ports**: Traits for external collaborators (history lookup, archive, upload cache)
//! - **services**: Header mapping, normalization, duplicate/transfer detection, import sessions
//! - **adapters**: Concrete implementations (DuckDB, gzip archive, caches)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::archive::GzipArchiver;
use adapters::cache::FileRawCache;
use adapters::duckdb::DuckDbRepository;
use config::Config;
use services::{ImportService, MapperService};

// Re-export commonly used types at crate root
pub use domain::result::Error;
pub use domain::{
    Account, CommitDecisions, CommitSummary, ImportRecord, ImportStatus, Institution, Mapper,
    MappingSchema, NormalizedRow, ReviewSnapshot, Transaction,
};
pub use services::{EntryPoint, LogEvent, LoggingService};

const DB_FILENAME: &str = "fintrack.duckdb";

/// Main context for fintrack operations
///
/// Holds the database, configuration and the wired services. The upload
/// cache lives in `<data_dir>/cache` so parse and commit can run in
/// separate processes.
pub struct FintrackContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub repository: Arc<DuckDbRepository>,
    pub logger: Option<Arc<LoggingService>>,
    pub mapper_service: MapperService,
    pub import_service: ImportService,
    pub archiver: GzipArchiver,
}

impl FintrackContext {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Self::build(data_dir, None)
    }

    /// Context whose services record events through `logger`
    pub fn with_logger(data_dir: &Path, logger: Arc<LoggingService>) -> Result<Self> {
        Self::build(data_dir, Some(logger))
    }

    fn build(data_dir: &Path, logger: Option<Arc<LoggingService>>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let config = Config::load(data_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&data_dir.join(DB_FILENAME))?);
        repository.ensure_schema()?;

        let cache = Arc::new(FileRawCache::new(data_dir.join("cache"), config.cache_ttl));
        let mut mapper_service = MapperService::new(Arc::clone(&repository));
        let mut import_service = ImportService::new(Arc::clone(&repository), cache, &config.matching);
        if let Some(logger) = &logger {
            mapper_service = mapper_service.with_logger(Arc::clone(logger));
            import_service = import_service.with_logger(Arc::clone(logger));
        }
        let archiver = GzipArchiver::new(config.archive_dir.clone());

        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            repository,
            logger,
            mapper_service,
            import_service,
            archiver,
        })
    }
}
