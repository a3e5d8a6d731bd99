//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `parse_month` - YYYY-MM argument parsing
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::db::Database;
use tally_core::models::YearMonth;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Parse an optional `--month` argument
pub fn parse_month(raw: Option<&str>) -> Result<Option<YearMonth>> {
    raw.map(|s| s.parse::<YearMonth>())
        .transpose()
        .context("Invalid --month format (use YYYY-MM)")
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;
    let existing = db.count_expenses().context("Failed to read ledger")?;
    if existing > 0 {
        println!("   Ledger already holds {} expenses", existing);
    }

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Try the bot locally: tally chat --user me");
    println!("  2. Start the webhook server: tally serve");

    Ok(())
}
