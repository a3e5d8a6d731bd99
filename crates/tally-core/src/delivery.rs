//! Outbound delivery contract

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::models::UserIdentity;

/// A quick-reply button offered alongside a message. The id is what the
/// transport reports back as a selection when the button is tapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Button {
    pub id: &'static str,
    pub title: &'static str,
}

impl Button {
    pub const fn new(id: &'static str, title: &'static str) -> Self {
        Self { id, title }
    }
}

/// Sends a rendered message to a user over some transport.
///
/// Failures are reported to the caller, which logs them; they never roll
/// back state that has already been committed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &UserIdentity, message: &str) -> Result<()>;

    /// Send a message with quick-reply buttons. Transports without buttons
    /// send the text alone; the text always names the typed alternatives.
    async fn send_with_buttons(
        &self,
        recipient: &UserIdentity,
        message: &str,
        _buttons: &[Button],
    ) -> Result<()> {
        self.send(recipient, message).await
    }
}

/// Notifier that only writes messages to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &UserIdentity, message: &str) -> Result<()> {
        info!(recipient = %recipient, chars = message.chars().count(), "Outbound message");
        tracing::debug!(recipient = %recipient, "{}", message);
        Ok(())
    }
}
