pub mod telegram;

use async_trait::async_trait;

pub use telegram::TelegramClient;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to send message: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned non-OK status: {0}")]
    Status(reqwest::StatusCode),
}

/// Somewhere alert messages can be delivered to.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError>;
}
