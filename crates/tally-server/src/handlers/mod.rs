//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod health;
pub mod reports;
pub mod webhook;

// Re-export all handlers for use in router
pub use health::*;
pub use reports::*;
pub use webhook::*;
