//! Delivery of messages to query owners.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Message;
use crate::services::telegram::{TelegramClient, is_markup_error};

/// Sends a message to the owner of a query.
///
/// Implementations map "recipient gone for good" to
/// [`AppError::RecipientUnreachable`](crate::error::AppError::RecipientUnreachable).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner: i64, message: &Message) -> Result<()>;
}

/// Notifier that delivers through the Telegram Bot API.
pub struct TelegramNotifier {
    client: TelegramClient,
}

impl TelegramNotifier {
    pub fn new(client: TelegramClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, owner: i64, message: &Message) -> Result<()> {
        match self.client.send_message(owner, &message.html, true).await {
            Err(e) if is_markup_error(&e) => {
                log::debug!("HTML rejected for chat {owner}, resending as plain text: {e}");
                self.client.send_message(owner, &message.plain, false).await
            }
            other => other,
        }
    }
}

/// Notifier that only writes messages to the log.
///
/// Used by the CLI when no bot token is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, owner: i64, message: &Message) -> Result<()> {
        log::info!("[notify {owner}] {}", message.plain.replace('\n', " | "));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notifier = LogNotifier;
        let message = Message::from_html("<b>hello</b>");
        assert!(notifier.notify(1, &message).await.is_ok());
    }
}
