//! Tally CLI - Receipt expense bot
//!
//! Usage:
//!   tally init                      Initialize database
//!   tally serve --port 3000         Start webhook server
//!   tally chat --user 905551112233  Chat with the bot from the terminal
//!   tally summary --user ID         Monthly summary
//!   tally report --month 2025-06    Send monthly reports now

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Serve {
            port,
            host,
            no_auth,
        } => commands::cmd_serve(&cli.db, &host, port, no_auth, cli.no_encrypt).await,
        Commands::Chat { user } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_chat(db, &user).await
        }
        Commands::Summary { user, month, year } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match year {
                Some(year) => commands::cmd_yearly_summary(&db, &user, year),
                None => commands::cmd_summary(&db, &user, month.as_deref()),
            }
        }
        Commands::Expenses { user, month, json } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_expenses(&db, &user, month.as_deref(), json)
        }
        Commands::Export { file, user, month } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_export(&db, &file, user.as_deref(), month.as_deref())?;
            Ok(())
        }
        Commands::Report { month } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let notifier = commands::report_notifier();
            commands::cmd_report(&db, notifier.as_ref(), month.as_deref()).await
        }
    }
}
