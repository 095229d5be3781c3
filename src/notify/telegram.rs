use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{Notifier, NotifyError};
use crate::logging::Logger;

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends plain text messages through the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
    log: Logger,
}

impl TelegramClient {
    pub fn new(
        token: impl Into<String>,
        chat_id: impl Into<String>,
        log: Logger,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            token: token.into(),
            chat_id: chat_id.into(),
            api_base: TELEGRAM_API_URL.to_string(),
            client,
            log,
        })
    }

    /// Points the client at another Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.token
        )
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let request = MessageRequest {
            chat_id: &self.chat_id,
            text,
        };

        let response = self
            .client
            .post(self.send_message_url())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(NotifyError::Status(status));
        }

        self.log
            .debug(format_args!("Successfully sent message to Telegram"));
        Ok(())
    }
}
