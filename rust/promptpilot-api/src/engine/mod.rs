//! Prompt-generation engine drivers.
//!
//! One driver ships: an OpenAI-compatible chat-completions client. The
//! executor only sees the [`PromptEngine`] seam, so tests swap in stubs.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::EngineConfig;

/// Generation seam between the execution pipeline and the model backend.
#[async_trait]
pub trait PromptEngine: Send + Sync {
    /// Runs one scheduled prompt and returns the generated text.
    async fn execute(&self, title: &str, content: &str) -> anyhow::Result<String>;

    /// Model identifier, reported on the info endpoint.
    fn model(&self) -> &str;
}

const SYSTEM_PROMPT: &str = "You are PromptPilot, an assistant that executes scheduled prompts. \
Carry out the user's prompt and reply with the result only, without preamble.";

/// OpenAI-compatible chat-completions driver (OpenAI, Groq, local servers).
#[derive(Debug, Clone)]
pub struct OpenAiEngine {
    settings: EngineConfig,
    client: Client,
}

impl OpenAiEngine {
    /// Create a new engine driver.
    pub fn new(settings: EngineConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { settings, client }
    }

    /// Build the API URL.
    fn api_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl PromptEngine for OpenAiEngine {
    async fn execute(&self, title: &str, content: &str) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("{}\n\n{}", title, content) },
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let mut request = self.client.post(self.api_url()).json(&body);
        if let Some(ref api_key) = self.settings.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Prompt engine error ({}): {}", status, text);
        }

        let completion: ChatCompletion = response.json().await?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            anyhow::bail!("Prompt engine returned an empty completion");
        }
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

/// Non-streaming chat-completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
