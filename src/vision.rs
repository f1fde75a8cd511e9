//! Client for an OpenAI-compatible vision model.
//!
//! One blocking round-trip per request, no retries. The service decides at
//! startup whether the model is reachable; see [`VisionClient::verify`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4.1-mini";

/// Token accounting reported alongside a model reply. Zero on every fallback
/// path that skips the model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Raw model reply plus its token accounting.
#[derive(Debug)]
pub struct ModelReply {
    pub text: String,
    pub usage: TokenUsage,
}

// No Debug derive: the client holds the API key.
#[derive(Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl VisionClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Checks that the configured model is retrievable with this key.
    /// Called once at startup; a failure here puts the service in offline mode.
    pub async fn verify(&self) -> Result<()> {
        let url = format!("{}/models/{}", self.base_url, self.model);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("could not reach the vision API")?;

        let status = response.status();
        if !status.is_success() {
            bail!("model '{}' not retrievable: HTTP {}", self.model, status);
        }
        Ok(())
    }

    /// Sends one chat-completion request and returns the reply text plus
    /// token usage. `user_content` is a list of text/image parts built with
    /// [`text_part`] and [`image_part`].
    pub async fn generate(
        &self,
        instructions: &str,
        user_content: Vec<serde_json::Value>,
    ) -> Result<ModelReply> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user", "content": user_content }
            ]
        });

        debug!("vision request to {}/chat/completions", self.base_url);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call vision API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("vision API error {}: {}", status, body);
            bail!("vision API returned {}: {}", status, body);
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .context("failed to parse vision API response")?;

        let usage = completion
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.is_empty())
            .context("no text content in model reply")?;

        Ok(ModelReply { text, usage })
    }
}

/// Builds an inline image part from base64-encoded JPEG data.
pub fn image_part(base64_jpeg: &str) -> serde_json::Value {
    json!({
        "type": "image_url",
        "image_url": { "url": format!("data:image/jpeg;base64,{}", base64_jpeg) }
    })
}

pub fn text_part(text: &str) -> serde_json::Value {
    json!({ "type": "text", "text": text })
}
