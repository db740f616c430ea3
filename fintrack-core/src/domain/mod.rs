//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
pub mod import;
pub mod mapping;
pub mod result;
mod transaction;

pub use account::{Account, Institution, NewAccount};
pub use import::{
    CommitDecisions, CommitSummary, DuplicatePair, ImportLog, ImportRecord, ImportStatus,
    ParseError, ReviewSnapshot, TransferCandidate,
};
pub use mapping::{AmountColumns, Mapper, MappingSchema};
pub use result::Error;
pub use transaction::{transfer_group_token, NewTransaction, NormalizedRow, Transaction};
