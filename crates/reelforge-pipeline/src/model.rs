//! OpenAI-compatible mutation model client.
//!
//! Any endpoint speaking `POST {endpoint}/chat/completions` works; the
//! request asks for a JSON object response and the message content is
//! parsed as the plan.

use async_trait::async_trait;
use reelforge_core::config::{ModelConfig, secret_or_env};
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::MutationModel;
use serde_json::{Value, json};
use std::time::Duration;

use crate::prompt::SYSTEM_PROMPT;

pub struct HttpMutationModel {
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl HttpMutationModel {
    /// API key resolution: `model.api_key` > `REELFORGE_MODEL_API_KEY` > empty.
    pub fn from_config(config: &ModelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: secret_or_env(&config.api_key, "REELFORGE_MODEL_API_KEY"),
            model: config.model.clone(),
            temperature: config.temperature,
            client,
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ]
        })
    }
}

/// Parse the plan out of a chat-completions response body.
pub fn parse_completion(body: &Value) -> Result<Value> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ForgeError::Model("response has no message content".into()))?;
    let trimmed = content.trim();
    // Some models wrap JSON in a fenced block despite response_format.
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(unfenced).map_err(|e| ForgeError::Model(format!("plan is not JSON: {e}")))
}

#[async_trait]
impl MutationModel for HttpMutationModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<Value> {
        let url = format!("{}/chat/completions", self.endpoint);
        let mut req = self.client.post(&url).json(&self.request_body(prompt));
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ForgeError::Model(format!("request to {url} failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let text: String = text.chars().take(300).collect();
            return Err(ForgeError::Model(format!("HTTP {status}: {text}")));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ForgeError::Model(format!("invalid response: {e}")))?;
        if let Some(usage) = body.get("usage") {
            tracing::debug!("🧠 {} usage: {usage}", self.model);
        }
        parse_completion(&body)
    }
}
