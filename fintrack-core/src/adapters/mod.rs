//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for storage and the TransactionLookup port
//! - Gzip files on disk for the Archiver port
//! - In-memory and file-backed stores for the RawBytesCache port

pub mod archive;
pub mod cache;
pub mod duckdb;
