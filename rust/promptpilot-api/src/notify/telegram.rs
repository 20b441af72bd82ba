//! Telegram Bot API delivery.

use anyhow::{Context, Result};
use reqwest::Client;

use super::ResultPayload;
use crate::config::NotifierConfig;

/// Telegram caps one message at 4096 characters.
pub(crate) const MESSAGE_LIMIT: usize = 4096;

/// Sends the payload via `sendMessage`, split into ordered chunks. Chunks
/// after the first are spaced by the configured delay; the first failure
/// aborts the remainder.
pub(crate) async fn send_message(
    client: &Client,
    settings: &NotifierConfig,
    bot_token: &str,
    chat_id: &str,
    payload: &ResultPayload,
) -> Result<()> {
    let text = format!("{}\n\n{}", payload.title, payload.body);
    let chunks = chunk_message(&text, MESSAGE_LIMIT);
    let total = chunks.len();

    let url = format!(
        "{}/bot{}/sendMessage",
        settings.telegram_api_base.trim_end_matches('/'),
        bot_token
    );

    for (index, chunk) in chunks.into_iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(settings.chunk_delay_ms)).await;
        }

        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": chunk,
        });
        let response = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Telegram sendMessage failed (chunk {}/{})", index + 1, total))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Telegram API error on chunk {}/{} ({}): {}",
                index + 1,
                total,
                status,
                text
            );
        }
    }
    Ok(())
}

/// Splits `text` into chunks of at most `limit` characters, in order,
/// never splitting a character. Empty input yields no chunks.
pub(crate) fn chunk_message(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in text.chars() {
        if count == limit {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    chunks.push(current);
    chunks
}
