//! DuckDB repository implementation

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{Days, NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, Connection, Params};

use crate::domain::{
    Account, Error, ImportLog, ImportRecord, ImportStatus, Institution, Mapper, MappingSchema,
    NewAccount, NewTransaction, NormalizedRow, Transaction,
};
use crate::ports::TransactionLookup;
use crate::services::MigrationService;

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Timestamps are stored as naive UTC
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// DuckDB repository implementation
///
/// Queries live on [`DuckDbSession`]; the repository hands out a session
/// either on the plain connection or inside a transaction.
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbRepository {
    /// Open (or create) a database file
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which can occur when two CLI invocations overlap.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            error = %err_msg,
                            "database busy, retrying"
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    // Non-retryable error or max retries reached
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    /// In-memory database, mainly for tests
    pub fn in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    /// Attempt to open a database connection (called by new() with retry logic)
    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Disable extension autoloading; JSON is statically linked and ICU is not used
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)?;
        Ok(conn)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)).into())
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<crate::services::MigrationResult> {
        let conn = self.lock()?;
        let migration_service = MigrationService::new(&conn);
        migration_service.run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    /// Run `f` against the connection without a transaction
    pub fn session<T>(&self, f: impl FnOnce(&DuckDbSession<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&DuckDbSession { conn: &conn })
    }

    /// Run `f` inside a transaction. Committed when `f` returns `Ok`,
    /// rolled back otherwise.
    pub fn transaction<T>(&self, f: impl FnOnce(&DuckDbSession<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&DuckDbSession { conn: &tx })?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }

    // === Convenience wrappers for single-statement reads and writes ===

    pub fn create_institution(&self, name: &str) -> Result<Institution> {
        self.session(|s| s.insert_institution(name))
    }

    pub fn get_institution(&self, id: i64) -> Result<Option<Institution>> {
        self.session(|s| s.get_institution(id))
    }

    pub fn list_institutions(&self) -> Result<Vec<Institution>> {
        self.session(|s| s.list_institutions())
    }

    pub fn create_account(&self, account: &NewAccount) -> Result<Account> {
        self.session(|s| s.insert_account(account))
    }

    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        self.session(|s| s.get_account(id))
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.session(|s| s.list_accounts())
    }

    pub fn get_import(&self, id: i64) -> Result<Option<ImportRecord>> {
        self.session(|s| s.get_import(id))
    }

    pub fn list_imports(&self, limit: usize) -> Result<Vec<ImportRecord>> {
        self.session(|s| s.list_imports(limit))
    }

    pub fn get_transactions_by_account(&self, account_id: i64) -> Result<Vec<Transaction>> {
        self.session(|s| s.transactions_for_account(account_id))
    }

    pub fn get_transactions_by_import(&self, import_id: i64) -> Result<Vec<Transaction>> {
        self.session(|s| s.transactions_for_import(import_id))
    }
}

/// Fields written when an import is parsed (first time or re-parse)
#[derive(Debug, Clone)]
pub struct ImportDraft<'a> {
    pub institution_id: i64,
    pub account_id: i64,
    pub mapper_id: Option<i64>,
    pub original_filename: &'a str,
    pub original_sha256: &'a str,
    pub log: &'a ImportLog,
    pub row_count: usize,
    pub duplicate_count: usize,
    pub error_count: usize,
}

/// Query surface over a borrowed connection (plain or transactional)
pub struct DuckDbSession<'c> {
    conn: &'c Connection,
}

const INSTITUTION_COLUMNS: &str = "id, name, is_active, created_at::VARCHAR";
const ACCOUNT_COLUMNS: &str =
    "id, institution_id, name, account_type, currency, is_active, created_at::VARCHAR";
const MAPPER_COLUMNS: &str =
    "id, institution_id, account_id, version, schema_json, created_at::VARCHAR";
const IMPORT_COLUMNS: &str = "id, institution_id, account_id, mapper_id, original_filename,
    original_sha256, archived_path, row_count, added_count, duplicate_count, error_count,
    status, log_json, created_at::VARCHAR";
const TRANSACTION_COLUMNS: &str = "id, account_id, import_id, txn_date::VARCHAR, description_raw,
    amount_cents, running_balance_cents, is_transfer, is_refund, is_joint, transfer_group,
    category_id, is_deleted, deleted_at::VARCHAR, created_at::VARCHAR";

impl<'c> DuckDbSession<'c> {
    fn next_id(&self, sequence: &str) -> Result<i64> {
        let id: i64 = self
            .conn
            .query_row(&format!("SELECT nextval('{}')", sequence), [], |row| row.get(0))?;
        Ok(id)
    }

    fn first_id<P: Params>(&self, sql: &str, params: P) -> Result<Option<i64>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query_map(params, |row| row.get::<_, i64>(0))?;
        Ok(rows.next().transpose()?)
    }

    // === Institutions & accounts ===

    pub fn insert_institution(&self, name: &str) -> Result<Institution> {
        let id = self.next_id("seq_institutions")?;
        let now = now_naive();
        self.conn.execute(
            "INSERT INTO institutions (id, name, is_active, created_at)
             VALUES (?, ?, true, CAST(? AS TIMESTAMP))",
            params![id, name, format_timestamp(&now)],
        )?;
        Ok(Institution {
            id,
            name: name.to_string(),
            is_active: true,
            created_at: now,
        })
    }

    pub fn get_institution(&self, id: i64) -> Result<Option<Institution>> {
        let sql = format!("SELECT {} FROM institutions WHERE id = ?", INSTITUTION_COLUMNS);
        Ok(self.query_institutions(&sql, params![id])?.into_iter().next())
    }

    pub fn list_institutions(&self) -> Result<Vec<Institution>> {
        let sql = format!("SELECT {} FROM institutions ORDER BY id", INSTITUTION_COLUMNS);
        self.query_institutions(&sql, [])
    }

    fn query_institutions<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Institution>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(id, name, is_active, created)| {
                Ok(Institution {
                    id,
                    name,
                    is_active,
                    created_at: parse_timestamp(&created)?,
                })
            })
            .collect()
    }

    pub fn insert_account(&self, account: &NewAccount) -> Result<Account> {
        let id = self.next_id("seq_accounts")?;
        let now = now_naive();
        let currency = Account::normalize_currency(&account.currency);
        self.conn.execute(
            "INSERT INTO accounts (id, institution_id, name, account_type, currency, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, true, CAST(? AS TIMESTAMP))",
            params![
                id,
                account.institution_id,
                account.name,
                account.account_type,
                currency,
                format_timestamp(&now)
            ],
        )?;
        Ok(Account {
            id,
            institution_id: account.institution_id,
            name: account.name.clone(),
            account_type: account.account_type.clone(),
            currency,
            is_active: true,
            created_at: now,
        })
    }

    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        Ok(self.query_accounts(&sql, params![id])?.into_iter().next())
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let sql = format!("SELECT {} FROM accounts ORDER BY id", ACCOUNT_COLUMNS);
        self.query_accounts(&sql, [])
    }

    fn query_accounts<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Account>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(id, institution_id, name, account_type, currency, is_active, created)| {
                Ok(Account {
                    id,
                    institution_id,
                    name,
                    account_type,
                    currency,
                    is_active,
                    created_at: parse_timestamp(&created)?,
                })
            })
            .collect()
    }

    // === Mappers ===

    /// Highest stored version for the (institution, account) pair
    pub fn max_mapper_version(&self, institution_id: i64, account_id: Option<i64>) -> Result<Option<i32>> {
        let version: Option<i32> = self.conn.query_row(
            "SELECT MAX(version) FROM mappers
             WHERE institution_id = ? AND account_id IS NOT DISTINCT FROM ?",
            params![institution_id, account_id],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    pub fn insert_mapper(
        &self,
        institution_id: i64,
        account_id: Option<i64>,
        version: i32,
        schema: &MappingSchema,
    ) -> Result<Mapper> {
        let id = self.next_id("seq_mappers")?;
        let now = now_naive();
        self.conn.execute(
            "INSERT INTO mappers (id, institution_id, account_id, version, schema_json, created_at)
             VALUES (?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
            params![
                id,
                institution_id,
                account_id,
                version,
                serde_json::to_string(schema)?,
                format_timestamp(&now)
            ],
        )?;
        Ok(Mapper {
            id,
            institution_id,
            account_id,
            version,
            schema: schema.clone(),
            created_at: now,
        })
    }

    pub fn get_mapper(&self, id: i64) -> Result<Option<Mapper>> {
        let sql = format!("SELECT {} FROM mappers WHERE id = ?", MAPPER_COLUMNS);
        Ok(self.query_mappers(&sql, params![id])?.into_iter().next())
    }

    pub fn latest_mapper(&self, account_id: i64, institution_id: i64) -> Result<Option<Mapper>> {
        let sql = format!(
            "SELECT {} FROM mappers WHERE account_id = ? AND institution_id = ?
             ORDER BY version DESC LIMIT 1",
            MAPPER_COLUMNS
        );
        Ok(self
            .query_mappers(&sql, params![account_id, institution_id])?
            .into_iter()
            .next())
    }

    pub fn list_mappers(&self, account_id: i64) -> Result<Vec<Mapper>> {
        let sql = format!(
            "SELECT {} FROM mappers WHERE account_id = ? ORDER BY institution_id, version",
            MAPPER_COLUMNS
        );
        self.query_mappers(&sql, params![account_id])
    }

    fn query_mappers<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Mapper>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, i32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(id, institution_id, account_id, version, schema_json, created)| {
                Ok(Mapper {
                    id,
                    institution_id,
                    account_id,
                    version,
                    schema: MappingSchema::from_json(&schema_json)?,
                    created_at: parse_timestamp(&created)?,
                })
            })
            .collect()
    }

    // === Imports ===

    /// Insert a new import, or reset the existing one with the same
    /// (account, content hash) back to `partial` with fresh review data.
    pub fn upsert_import(&self, draft: &ImportDraft<'_>) -> Result<ImportRecord> {
        let log_json = draft.log.to_json()?;
        let existing = self.first_id(
            "SELECT id FROM imports WHERE account_id = ? AND original_sha256 = ?",
            params![draft.account_id, draft.original_sha256],
        )?;

        let id = match existing {
            Some(id) => {
                self.conn.execute(
                    "UPDATE imports SET
                        mapper_id = ?, log_json = ?, row_count = ?, added_count = 0,
                        duplicate_count = ?, error_count = ?, status = ?
                     WHERE id = ?",
                    params![
                        draft.mapper_id,
                        log_json,
                        draft.row_count as i64,
                        draft.duplicate_count as i64,
                        draft.error_count as i64,
                        ImportStatus::Partial.as_str(),
                        id
                    ],
                )?;
                id
            }
            None => {
                let id = self.next_id("seq_imports")?;
                self.conn.execute(
                    "INSERT INTO imports (id, institution_id, account_id, mapper_id, original_filename,
                                          original_sha256, row_count, added_count, duplicate_count,
                                          error_count, status, log_json, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
                    params![
                        id,
                        draft.institution_id,
                        draft.account_id,
                        draft.mapper_id,
                        draft.original_filename,
                        draft.original_sha256,
                        draft.row_count as i64,
                        draft.duplicate_count as i64,
                        draft.error_count as i64,
                        ImportStatus::Partial.as_str(),
                        log_json,
                        format_timestamp(&now_naive())
                    ],
                )?;
                id
            }
        };

        self.get_import(id)?
            .ok_or_else(|| Error::database(format!("import {} vanished during upsert", id)).into())
    }

    pub fn get_import(&self, id: i64) -> Result<Option<ImportRecord>> {
        let sql = format!("SELECT {} FROM imports WHERE id = ?", IMPORT_COLUMNS);
        Ok(self.query_imports(&sql, params![id])?.into_iter().next())
    }

    /// Newest first
    pub fn list_imports(&self, limit: usize) -> Result<Vec<ImportRecord>> {
        let sql = format!(
            "SELECT {} FROM imports ORDER BY created_at DESC, id DESC LIMIT ?",
            IMPORT_COLUMNS
        );
        self.query_imports(&sql, params![limit as i64])
    }

    /// Record a successful commit
    pub fn complete_import(
        &self,
        id: i64,
        added_count: usize,
        error_count: usize,
        archived_path: &str,
        log: &ImportLog,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE imports SET added_count = ?, error_count = ?, status = ?,
                                archived_path = ?, log_json = ?
             WHERE id = ?",
            params![
                added_count as i64,
                error_count as i64,
                ImportStatus::Success.as_str(),
                archived_path,
                log.to_json()?,
                id
            ],
        )?;
        Ok(())
    }

    pub fn set_import_status(&self, id: i64, status: ImportStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE imports SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    fn query_imports<P: Params>(&self, sql: &str, params: P) -> Result<Vec<ImportRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, |row| {
                Ok(RawImport {
                    id: row.get(0)?,
                    institution_id: row.get(1)?,
                    account_id: row.get(2)?,
                    mapper_id: row.get(3)?,
                    original_filename: row.get(4)?,
                    original_sha256: row.get(5)?,
                    archived_path: row.get(6)?,
                    row_count: row.get(7)?,
                    added_count: row.get(8)?,
                    duplicate_count: row.get(9)?,
                    error_count: row.get(10)?,
                    status: row.get(11)?,
                    log_json: row.get(12)?,
                    created_at: row.get(13)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        raw.into_iter().map(RawImport::into_record).collect()
    }

    // === Transactions ===

    pub fn insert_transaction(&self, tx: &NewTransaction) -> Result<i64> {
        let id = self.next_id("seq_transactions")?;
        self.conn.execute(
            "INSERT INTO transactions (id, account_id, import_id, txn_date, description_raw,
                                       amount_cents, running_balance_cents, is_transfer,
                                       transfer_group, created_at)
             VALUES (?, ?, ?, CAST(? AS DATE), ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
            params![
                id,
                tx.account_id,
                tx.import_id,
                format_date(&tx.row.txn_date),
                tx.row.description_raw,
                tx.row.amount_cents,
                tx.row.running_balance_cents,
                tx.is_transfer,
                tx.transfer_group,
                format_timestamp(&now_naive())
            ],
        )?;
        Ok(id)
    }

    /// Soft-deleted transaction on the account with identical date, description and amount
    pub fn find_deleted_exact(&self, account_id: i64, row: &NormalizedRow) -> Result<Option<i64>> {
        self.first_id(
            "SELECT id FROM transactions
             WHERE account_id = ? AND is_deleted = true
               AND txn_date = CAST(? AS DATE) AND description_raw = ? AND amount_cents = ?
             ORDER BY id LIMIT 1",
            params![
                account_id,
                format_date(&row.txn_date),
                row.description_raw,
                row.amount_cents
            ],
        )
    }

    /// Un-delete a transaction and hand it to a new import
    pub fn revive_transaction(&self, id: i64, import_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE transactions SET is_deleted = false, deleted_at = NULL, import_id = ?
             WHERE id = ?",
            params![import_id, id],
        )?;
        Ok(())
    }

    /// Soft-delete every live transaction linked to the import
    pub fn soft_delete_import_transactions(&self, import_id: i64) -> Result<usize> {
        let deleted = self.conn.execute(
            "UPDATE transactions SET is_deleted = true, deleted_at = CAST(? AS TIMESTAMP)
             WHERE import_id = ? AND is_deleted = false",
            params![format_timestamp(&now_naive()), import_id],
        )?;
        Ok(deleted)
    }

    /// All rows of the account, deleted ones included, oldest first
    pub fn transactions_for_account(&self, account_id: i64) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE account_id = ? ORDER BY txn_date, id",
            TRANSACTION_COLUMNS
        );
        self.query_transactions(&sql, params![account_id])
    }

    pub fn transactions_for_import(&self, import_id: i64) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE import_id = ? ORDER BY id",
            TRANSACTION_COLUMNS
        );
        self.query_transactions(&sql, params![import_id])
    }

    fn query_transactions<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, |row| {
                Ok(RawTransaction {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    import_id: row.get(2)?,
                    txn_date: row.get(3)?,
                    description_raw: row.get(4)?,
                    amount_cents: row.get(5)?,
                    running_balance_cents: row.get(6)?,
                    is_transfer: row.get(7)?,
                    is_refund: row.get(8)?,
                    is_joint: row.get(9)?,
                    transfer_group: row.get(10)?,
                    category_id: row.get(11)?,
                    is_deleted: row.get(12)?,
                    deleted_at: row.get(13)?,
                    created_at: row.get(14)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        raw.into_iter().map(RawTransaction::into_transaction).collect()
    }
}

impl TransactionLookup for DuckDbSession<'_> {
    fn find_exact(&self, account_id: i64, row: &NormalizedRow) -> Result<Option<i64>> {
        self.first_id(
            "SELECT id FROM transactions
             WHERE account_id = ? AND is_deleted = false
               AND txn_date = CAST(? AS DATE) AND description_raw = ? AND amount_cents = ?
             ORDER BY id LIMIT 1",
            params![
                account_id,
                format_date(&row.txn_date),
                row.description_raw,
                row.amount_cents
            ],
        )
    }

    fn find_amount_in_window(
        &self,
        account_id: i64,
        amount_cents: i64,
        date: NaiveDate,
        window_days: i64,
    ) -> Result<Option<i64>> {
        let (from, to) = window_bounds(date, window_days);
        self.first_id(
            "SELECT id FROM transactions
             WHERE account_id = ? AND is_deleted = false AND amount_cents = ?
               AND txn_date BETWEEN CAST(? AS DATE) AND CAST(? AS DATE)
             ORDER BY id LIMIT 1",
            params![account_id, amount_cents, format_date(&from), format_date(&to)],
        )
    }

    fn find_in_other_accounts(
        &self,
        excluded_account_id: i64,
        amount_cents: i64,
        date: NaiveDate,
        window_days: i64,
    ) -> Result<Option<i64>> {
        let (from, to) = window_bounds(date, window_days);
        self.first_id(
            "SELECT id FROM transactions
             WHERE account_id <> ? AND is_deleted = false AND amount_cents = ?
               AND txn_date BETWEEN CAST(? AS DATE) AND CAST(? AS DATE)
             ORDER BY id LIMIT 1",
            params![excluded_account_id, amount_cents, format_date(&from), format_date(&to)],
        )
    }
}

// Row images before conversion into domain types

struct RawImport {
    id: i64,
    institution_id: i64,
    account_id: i64,
    mapper_id: Option<i64>,
    original_filename: String,
    original_sha256: String,
    archived_path: Option<String>,
    row_count: i64,
    added_count: i64,
    duplicate_count: i64,
    error_count: i64,
    status: String,
    log_json: String,
    created_at: String,
}

impl RawImport {
    fn into_record(self) -> Result<ImportRecord> {
        Ok(ImportRecord {
            id: self.id,
            institution_id: self.institution_id,
            account_id: self.account_id,
            mapper_id: self.mapper_id,
            original_filename: self.original_filename,
            original_sha256: self.original_sha256,
            archived_path: self.archived_path,
            row_count: self.row_count,
            added_count: self.added_count,
            duplicate_count: self.duplicate_count,
            error_count: self.error_count,
            status: self.status.parse()?,
            log: ImportLog::parse(&self.log_json)
                .with_context(|| format!("import {} has an unreadable log", self.id))?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct RawTransaction {
    id: i64,
    account_id: i64,
    import_id: Option<i64>,
    txn_date: String,
    description_raw: String,
    amount_cents: i64,
    running_balance_cents: Option<i64>,
    is_transfer: bool,
    is_refund: bool,
    is_joint: bool,
    transfer_group: Option<String>,
    category_id: Option<i64>,
    is_deleted: bool,
    deleted_at: Option<String>,
    created_at: String,
}

impl RawTransaction {
    fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            id: self.id,
            account_id: self.account_id,
            import_id: self.import_id,
            txn_date: parse_date(&self.txn_date)?,
            description_raw: self.description_raw,
            amount_cents: self.amount_cents,
            running_balance_cents: self.running_balance_cents,
            is_transfer: self.is_transfer,
            is_refund: self.is_refund,
            is_joint: self.is_joint,
            transfer_group: self.transfer_group,
            category_id: self.category_id,
            is_deleted: self.is_deleted,
            deleted_at: self.deleted_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

// Helper functions

fn now_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid stored date '{}'", s))
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .with_context(|| format!("invalid stored timestamp '{}'", s))
}

/// Inclusive date range `date - days ..= date + days`
fn window_bounds(date: NaiveDate, days: i64) -> (NaiveDate, NaiveDate) {
    let span = Days::new(days.max(0) as u64);
    (
        date.checked_sub_days(span).unwrap_or(NaiveDate::MIN),
        date.checked_add_days(span).unwrap_or(NaiveDate::MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> DuckDbRepository {
        let repo = DuckDbRepository::in_memory().unwrap();
        repo.ensure_schema().unwrap();
        repo
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_window_bounds_inclusive() {
        let (from, to) = window_bounds(date("2024-03-01"), 2);
        assert_eq!(from, date("2024-02-28"));
        assert_eq!(to, date("2024-03-03"));
    }

    #[test]
    fn test_poisoned_connection_is_database_error() {
        let repo = std::sync::Arc::new(repo());
        let holder = std::sync::Arc::clone(&repo);
        let _ = thread::spawn(move || {
            let _conn = holder.conn.lock().unwrap();
            panic!("writer crashed");
        })
        .join();

        let err = repo.list_institutions().unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Database(_))));
        assert!(err.to_string().contains("Lock poisoned"));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("IO Error: Could not set lock on file: database is locked"));
        assert!(!is_retryable_error("Catalog Error: Table does not exist"));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2024-01-02 03:04:05").is_ok());
        assert!(parse_timestamp("2024-01-02 03:04:05.123456").is_ok());
        assert!(parse_timestamp("not a time").is_err());
    }

    #[test]
    fn test_institution_and_account_round_trip() {
        let repo = repo();
        let inst = repo.create_institution("First Bank").unwrap();
        let acct = repo
            .create_account(&NewAccount::new(inst.id, "Checking").with_currency("usd"))
            .unwrap();

        assert_eq!(repo.get_institution(inst.id).unwrap().unwrap().name, "First Bank");
        let loaded = repo.get_account(acct.id).unwrap().unwrap();
        assert_eq!(loaded.currency, "USD");
        assert_eq!(loaded.institution_id, inst.id);
        assert!(repo.get_account(999).unwrap().is_none());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let repo = repo();
        let result: Result<()> = repo.transaction(|s| {
            s.insert_institution("Temporary")?;
            Err(anyhow!("boom"))
        });
        assert!(result.is_err());
        assert!(repo.list_institutions().unwrap().is_empty());
    }

    #[test]
    fn test_lookup_ignores_deleted_and_prefers_lowest_id() {
        let repo = repo();
        let row = NormalizedRow::new(date("2024-01-10"), "GROCERY", -2500);
        repo.transaction(|s| {
            let first = s.insert_transaction(&NewTransaction::imported(1, 1, row.clone()))?;
            s.insert_transaction(&NewTransaction::imported(1, 1, row.clone()))?;
            assert_eq!(s.find_exact(1, &row)?, Some(first));

            s.soft_delete_import_transactions(1)?;
            assert_eq!(s.find_exact(1, &row)?, None);
            assert_eq!(s.find_deleted_exact(1, &row)?, Some(first));
            Ok(())
        })
        .unwrap();
    }
}
