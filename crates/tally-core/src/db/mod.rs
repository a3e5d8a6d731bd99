//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `expenses` - Append-only expense ledger and its queries
//! - `users` - First/last contact bookkeeping for conversation participants
//! - `export` - CSV export of the ledger

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod expenses;
mod export;
mod users;

pub use export::ExportFilter;
pub use users::UserContact;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "TALLY_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"tally-salt-v1-ok";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let hash = Argon2::default()
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_output = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_output.as_bytes()))
}

/// Parse a stored timestamp (RFC 3339, or SQLite's `YYYY-MM-DD HH:MM:SS`)
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| {
            tracing::warn!(value = s, "Unparseable timestamp in database");
            DateTime::<Utc>::default()
        })
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Open an encrypted database
    ///
    /// Requires `TALLY_DB_KEY` to be set. Use `new_unencrypted()` for
    /// development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} with your passphrase, \
                or use --no-encrypt for an unencrypted database.",
                DB_KEY_ENV
            ))),
        }
    }

    /// Open an unencrypted database (development/testing only)
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Open a database with an explicit encryption passphrase
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", derive_key(pass)?);
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                conn.execute_batch("PRAGMA synchronous = FULL;")
            });
            Pool::builder().max_size(10).build(manager)?
        } else {
            let manager =
                manager.with_init(|conn| conn.execute_batch("PRAGMA synchronous = FULL;"));
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` because every pooled
    /// connection would otherwise see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("tally_test_{}_{}.db", std::process::id(), id));
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path.to_string_lossy())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers (reports) don't block the ledger writer
            PRAGMA journal_mode = WAL;
            PRAGMA temp_store = MEMORY;

            -- Conversation participants, recorded on first contact
            CREATE TABLE IF NOT EXISTS users (
                owner TEXT PRIMARY KEY,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0
            );

            -- Committed expenses (append-only)
            CREATE TABLE IF NOT EXISTS expenses (
                id INTEGER PRIMARY KEY,
                owner TEXT NOT NULL,
                amount_original REAL NOT NULL CHECK (amount_original > 0),
                currency TEXT NOT NULL,
                rate_class TEXT NOT NULL CHECK (rate_class IN ('POS', 'ATM')),
                rate_used REAL NOT NULL,
                converted_amount REAL NOT NULL,
                merchant TEXT NOT NULL DEFAULT 'unknown',
                month_year TEXT NOT NULL,                  -- YYYY-MM of expense_date
                source TEXT NOT NULL DEFAULT 'receipt',    -- receipt, manual
                receipt_hash TEXT,                         -- SHA-256 of the receipt image
                expense_date TEXT NOT NULL,                -- YYYY-MM-DD purchase date
                confidence TEXT,                           -- high, medium, low
                idempotency_key TEXT UNIQUE,               -- one row per pending transaction
                committed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_expenses_owner_month ON expenses(owner, month_year);
            CREATE INDEX IF NOT EXISTS idx_expenses_month ON expenses(month_year);

            -- The ledger never rewrites history
            CREATE TRIGGER IF NOT EXISTS expenses_no_update
            BEFORE UPDATE ON expenses
            BEGIN
                SELECT RAISE(ABORT, 'expenses are append-only');
            END;
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
