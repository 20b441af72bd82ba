//! Outbound delivery to chat channels.
//!
//! The [`Notifier`] seam never surfaces an error to the caller: every
//! failure (network, remote 4xx/5xx) is folded into the returned
//! [`ChannelDelivery`]. Retry policy belongs to the execution pipeline,
//! not here; the only pacing done internally is the fixed delay between
//! sequential Telegram chunks.

pub mod discord;
pub mod telegram;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::NotifierConfig;
use crate::domain::{ChannelDelivery, ChannelSettings};

/// Result of one schedule execution, formatted per channel on the way out.
#[derive(Debug, Clone)]
pub struct ResultPayload {
    pub title: String,
    pub body: String,
    pub display_time: String,
}

/// Delivery seam between the execution pipeline and the chat platforms.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers the payload to the channel described by `settings`.
    async fn send(&self, settings: &ChannelSettings, payload: &ResultPayload) -> ChannelDelivery;
}

/// Production notifier speaking the Discord webhook and Telegram Bot APIs.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    settings: NotifierConfig,
    client: Client,
}

impl HttpNotifier {
    /// Create a new notifier.
    pub fn new(settings: NotifierConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { settings, client }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, settings: &ChannelSettings, payload: &ResultPayload) -> ChannelDelivery {
        let outcome = match settings {
            ChannelSettings::Discord { webhook_url } => {
                discord::send_webhook(&self.client, webhook_url, payload).await
            }
            ChannelSettings::Telegram { bot_token, chat_id } => {
                telegram::send_message(
                    &self.client,
                    &self.settings,
                    bot_token,
                    chat_id,
                    payload,
                )
                .await
            }
        };

        match outcome {
            Ok(()) => ChannelDelivery::ok(),
            Err(err) => {
                tracing::warn!(channel = %settings.channel(), "Delivery failed: {:#}", err);
                ChannelDelivery::failed(format!("{:#}", err))
            }
        }
    }
}
