/// Notification sink. Fire-and-forget: delivery failures are logged by the
/// caller and never fatal to the decision cycle.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

/// Alerts are best-effort; a slow endpoint must not hold up a cycle.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(#[from] reqwest::Error),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}

/// Sends the text and logs a warning on failure instead of propagating it.
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.notify(text).await {
        warn!(error = %e, "notification dropped");
    }
}

/// Telegram bot sendMessage adapter.
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "telegram returned {}",
                response.status()
            )));
        }
        debug!("telegram alert sent");
        Ok(())
    }
}

/// Stand-in sink when no notification channel is configured; alerts go to
/// the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        tracing::info!(alert = text, "notification");
        Ok(())
    }
}
