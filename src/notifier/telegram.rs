use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use url::Url;

use crate::app::{PostflowError, Result};
use crate::notifier::{LifecycleEvent, Notifier};

const TELEGRAM_API: &str = "https://api.telegram.org/";

/// Sends events to the operator's chat through the Bot API `sendMessage` call.
pub struct TelegramNotifier {
    client: Client,
    endpoint: Url,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: impl Into<String>) -> Result<Self> {
        Self::with_base(TELEGRAM_API, bot_token, chat_id)
    }

    fn with_base(base: &str, bot_token: &str, chat_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        // Tokens contain ':', so the path cannot go through `Url::join`.
        let endpoint = Url::parse(&format!("{}bot{}/sendMessage", base, bot_token))?;

        Ok(Self {
            client,
            endpoint,
            chat_id: chat_id.into(),
        })
    }

    fn message_for(event: &LifecycleEvent) -> String {
        match event {
            LifecycleEvent::Published { .. } => format!("✅ {}", event),
            LifecycleEvent::Failed { .. } => format!("❌ {}", event),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: &LifecycleEvent) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({
                "chat_id": self.chat_id,
                "text": Self::message_for(event),
            }))
            .send()
            .await
            // The endpoint path carries the bot token.
            .map_err(|e| PostflowError::Http(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PostflowError::Other(format!(
                "Telegram sendMessage returned {}",
                status
            )));
        }

        tracing::debug!("Notified chat about post {}", event.post_id());
        Ok(())
    }
}
