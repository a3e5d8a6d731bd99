//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Database init and shared utilities (open_db, parse_month)
//! - `chat` - Interactive terminal session against the conversation engine
//! - `reports` - Summaries, expense listing, CSV export and the monthly report run
//! - `serve` - Web server command

pub mod chat;
pub mod core;
pub mod reports;
pub mod serve;

// Re-export command functions for main.rs
pub use chat::*;
pub use core::*;
pub use reports::*;
pub use serve::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
