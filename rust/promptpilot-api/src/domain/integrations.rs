//! Integration settings models.
//!
//! Channel settings are a tagged union decoded once at the storage
//! boundary; raw JSON never crosses module seams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External delivery target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Telegram,
    Discord,
}

impl Channel {
    /// Stable string form, used in routes, storage, and log maps.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Discord => "discord",
        }
    }

    /// Parses the string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "telegram" => Some(Self::Telegram),
            "discord" => Some(Self::Discord),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed per-channel delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ChannelSettings {
    Telegram { bot_token: String, chat_id: String },
    Discord { webhook_url: String },
}

impl ChannelSettings {
    /// The channel these settings configure.
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::Telegram { .. } => Channel::Telegram,
            Self::Discord { .. } => Channel::Discord,
        }
    }

    /// Boundary validation: required fields present and well-formed.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            Self::Telegram { bot_token, chat_id } => {
                if bot_token.trim().is_empty() {
                    anyhow::bail!("telegram bot_token must not be empty");
                }
                if chat_id.trim().is_empty() {
                    anyhow::bail!("telegram chat_id must not be empty");
                }
            }
            Self::Discord { webhook_url } => {
                let url = url::Url::parse(webhook_url)
                    .map_err(|e| anyhow::anyhow!("discord webhook_url is not a valid URL: {}", e))?;
                if url.scheme() != "https" && url.scheme() != "http" {
                    anyhow::bail!("discord webhook_url must be an HTTP(S) URL");
                }
            }
        }
        Ok(())
    }

    /// Copy with secret material replaced, for list responses.
    #[must_use]
    pub fn redacted(&self) -> Self {
        match self {
            Self::Telegram { chat_id, .. } => Self::Telegram {
                bot_token: "[redacted]".to_string(),
                chat_id: chat_id.clone(),
            },
            Self::Discord { .. } => Self::Discord {
                webhook_url: "[redacted]".to_string(),
            },
        }
    }
}

/// Stored per-owner, per-channel configuration. Unique per (owner, channel);
/// soft-deleted via `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSettings {
    /// Unique settings row ID.
    pub id: i64,
    /// Owning account.
    pub owner_id: i64,
    /// Decoded channel settings.
    pub settings: ChannelSettings,
    /// Soft-delete flag.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trip() {
        assert_eq!(Channel::parse("telegram"), Some(Channel::Telegram));
        assert_eq!(Channel::parse("discord"), Some(Channel::Discord));
        assert_eq!(Channel::parse("slack"), None);
    }

    #[test]
    fn test_settings_tagged_json() {
        let settings = ChannelSettings::Discord {
            webhook_url: "https://discord.com/api/webhooks/1/abc".to_string(),
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains(r#""channel":"discord""#));

        let back: ChannelSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channel(), Channel::Discord);
    }

    #[test]
    fn test_settings_validation() {
        let bad = ChannelSettings::Telegram {
            bot_token: " ".to_string(),
            chat_id: "42".to_string(),
        };
        assert!(bad.validate().is_err());

        let bad = ChannelSettings::Discord {
            webhook_url: "not-a-url".to_string(),
        };
        assert!(bad.validate().is_err());

        let good = ChannelSettings::Telegram {
            bot_token: "123:abc".to_string(),
            chat_id: "-100200300".to_string(),
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_redaction_keeps_routing_fields() {
        let settings = ChannelSettings::Telegram {
            bot_token: "123:secret".to_string(),
            chat_id: "7".to_string(),
        };
        match settings.redacted() {
            ChannelSettings::Telegram { bot_token, chat_id } => {
                assert_eq!(bot_token, "[redacted]");
                assert_eq!(chat_id, "7");
            }
            ChannelSettings::Discord { .. } => panic!("channel changed"),
        }
    }
}
