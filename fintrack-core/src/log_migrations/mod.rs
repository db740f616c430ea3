//! Event log database migrations (logs.duckdb)
//!
//! Kept apart from the main schema so the log file can be cleared or
//! deleted without touching financial data.

pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
];
