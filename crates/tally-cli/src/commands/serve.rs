//! Server command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tally_server::{AppState, ServerConfig};

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
) -> Result<()> {
    println!("🚀 Starting Tally webhook server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    let mut config = ServerConfig::from_env();
    config.require_auth = !no_auth;

    if no_auth {
        println!();
        println!("   ⚠️  Report API authentication DISABLED - do not expose to network!");
    } else if !config.api_keys.is_empty() {
        println!(
            "   🔑 API keys: {} configured (TALLY_API_KEYS)",
            config.api_keys.len()
        );
    }
    if config.verify_token.is_some() {
        println!("   🔗 Webhook verify token: set (WHATSAPP_VERIFY_TOKEN)");
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;
    let state = AppState::from_env(db, config)?;

    tally_server::serve(Arc::new(state), host, port).await
}
