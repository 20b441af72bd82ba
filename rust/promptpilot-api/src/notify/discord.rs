//! Discord webhook delivery.

use anyhow::Result;
use reqwest::Client;

use super::ResultPayload;

/// Discord caps embed descriptions at 4096 characters.
pub(crate) const EMBED_DESCRIPTION_LIMIT: usize = 4096;
const TRUNCATION_MARKER: &str = "… [truncated]";

/// Posts the payload as one embed to the owner's webhook.
pub(crate) async fn send_webhook(
    client: &Client,
    webhook_url: &str,
    payload: &ResultPayload,
) -> Result<()> {
    let body = serde_json::json!({
        "embeds": [{
            "title": payload.title,
            "description": truncate_description(&payload.body, EMBED_DESCRIPTION_LIMIT),
            "color": 0x5865F2,
            "footer": { "text": format!("Scheduled for {}", payload.display_time) },
        }]
    });

    let response = client.post(webhook_url).json(&body).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("Discord webhook error ({}): {}", status, text);
    }
    Ok(())
}

/// Caps `text` at `limit` characters, replacing the tail with a visible
/// marker when over. Counts characters, never splitting one in half.
pub(crate) fn truncate_description(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if limit <= marker_len {
        return text.chars().take(limit).collect();
    }
    let mut truncated: String = text.chars().take(limit - marker_len).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
