//! Interactive chat command
//!
//! Drives the conversation engine from the terminal, one line per inbound
//! message. Lines starting with `/` are local controls:
//! - `/image <path>` sends the file as a receipt photo
//! - `/select <id>` sends a button selection (e.g. `pos_rate`)
//! - `/quit` ends the session
//!
//! Any other `/word` is passed through to the engine as plain text.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tally_core::conversation::render_all;
use tally_core::db::Database;
use tally_core::{
    ConversationEngine, EngineConfig, ExtractionBackend, ExtractionClient, InboundEvent,
    LogNotifier, MockBackend,
};

/// One parsed line of terminal input
pub enum ChatLine {
    Quit,
    Empty,
    Event(InboundEvent),
}

/// Turn a terminal line into an inbound event for `user`
pub fn parse_chat_line(user: &str, line: &str) -> Result<ChatLine> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ChatLine::Empty);
    }

    let Some(control) = line.strip_prefix('/') else {
        return Ok(ChatLine::Event(InboundEvent::text(user, line)));
    };

    let (name, arg) = control
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((control, ""));

    match name {
        "quit" | "exit" => Ok(ChatLine::Quit),
        "image" => {
            anyhow::ensure!(!arg.is_empty(), "Usage: /image <path>");
            let bytes = std::fs::read(Path::new(arg))
                .with_context(|| format!("Failed to read image: {}", arg))?;
            Ok(ChatLine::Event(InboundEvent::image(user, bytes)))
        }
        "select" => {
            anyhow::ensure!(!arg.is_empty(), "Usage: /select <id>");
            Ok(ChatLine::Event(InboundEvent::selection(user, arg)))
        }
        // Unrecognized words (e.g. `/start`) are ordinary message text
        _ => Ok(ChatLine::Event(InboundEvent::text(user, line))),
    }
}

/// Run a chat session until `/quit` or end of input; returns the number of
/// messages handled
pub async fn run_chat<R: BufRead, W: Write>(
    engine: &ConversationEngine,
    user: &str,
    mut input: R,
    mut output: W,
) -> Result<usize> {
    let mut handled = 0;
    let mut line = String::new();

    loop {
        write!(output, "> ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }

        let event = match parse_chat_line(user, &line) {
            Ok(ChatLine::Quit) => break,
            Ok(ChatLine::Empty) => continue,
            Ok(ChatLine::Event(event)) => event,
            Err(e) => {
                writeln!(output, "⚠️  {:#}", e)?;
                continue;
            }
        };

        if engine.sweep_stale().await > 0 {
            writeln!(output, "🤖 ⏰ Your unfinished expense timed out and was discarded.\n")?;
        }

        let replies = engine.handle(event).await;
        handled += 1;
        writeln!(output, "🤖 {}\n", render_all(&replies))?;
    }

    Ok(handled)
}

pub async fn cmd_chat(db: Database, user: &str) -> Result<()> {
    let extractor: Arc<dyn ExtractionBackend> = match ExtractionClient::from_env() {
        Some(client) => {
            println!("   🤖 Extraction backend: {}", client.name());
            Arc::new(client)
        }
        None => {
            println!("   💡 Tip: Set OLLAMA_HOST to read real receipts (using the mock backend)");
            Arc::new(MockBackend::new())
        }
    };

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let engine = ConversationEngine::new(extractor, Arc::new(db), Arc::new(LogNotifier), config);

    println!("💬 Chatting as {} (type /quit to exit, /image <path> to send a receipt)", user);
    println!();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let handled = run_chat(&engine, user, stdin.lock(), stdout.lock()).await?;

    println!("👋 Session ended after {} messages", handled);
    Ok(())
}
