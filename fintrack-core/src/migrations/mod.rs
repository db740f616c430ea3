//! Main database migrations, embedded with include_str!
//!
//! Entries are (file name, SQL) and run in list order. The first entry
//! creates `sys_migrations` and must stay first.

pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
];
