//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. The import
//! pipeline is split leaf first: mapping, normalization, duplicate and
//! transfer detection, then the import session that drives them.

pub mod duplicates;
pub mod import;
pub mod logging;
pub mod mapping;
pub mod migration;
pub mod normalize;
pub mod transfers;

pub use duplicates::{DuplicateDetector, DuplicateReport, SECONDARY_DUPLICATE_WINDOW_DAYS};
pub use import::{content_hash, ImportService, MappingPreview, ParsedImport};
pub use logging::{EntryPoint, LogEntry, LogEvent, LoggingService};
pub use mapping::{guess_mapping, MapperService};
pub use migration::{MigrationResult, MigrationService};
pub use normalize::{normalize, read_table, RowError, RowNormalizer, Table};
pub use transfers::{TransferDetector, TRANSFER_WINDOW_DAYS};
