//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The import
//! pipeline depends only on these traits, not on concrete implementations.

mod archive;
mod cache;
mod lookup;

pub use archive::{ArchiveEntry, Archiver};
pub use cache::RawBytesCache;
pub use lookup::TransactionLookup;
