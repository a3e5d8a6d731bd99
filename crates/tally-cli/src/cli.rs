//! CLI argument definitions using clap
//!
//! This module contains the clap structs for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Receipt expense tracking over chat
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Self-hosted receipt expense bot", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Start the webhook server and background schedulers
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable API key authentication for /api (development only)
        #[arg(long)]
        no_auth: bool,
    },

    /// Talk to the bot from the terminal as a given user
    Chat {
        /// Sender identity (e.g. a phone number)
        #[arg(short, long)]
        user: String,
    },

    /// Show a user's monthly summary
    Summary {
        #[arg(short, long)]
        user: String,

        /// Month as YYYY-MM (default: current month)
        #[arg(short, long)]
        month: Option<String>,

        /// Show the yearly summary for this year instead
        #[arg(short, long, conflicts_with = "month")]
        year: Option<i32>,
    },

    /// List a user's committed expenses
    Expenses {
        #[arg(short, long)]
        user: String,

        /// Month as YYYY-MM (default: all months)
        #[arg(short, long)]
        month: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Export committed expenses to CSV
    Export {
        /// Output file
        #[arg(short, long)]
        file: PathBuf,

        /// Only this user's expenses
        #[arg(short, long)]
        user: Option<String>,

        /// Only this month (YYYY-MM)
        #[arg(short, long)]
        month: Option<String>,
    },

    /// Send the monthly report to every user now
    Report {
        /// Month as YYYY-MM (default: previous month)
        #[arg(short, long)]
        month: Option<String>,
    },
}
