//! HTTP client for the remote locator-patch registry.

use async_trait::async_trait;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::{PatchCandidate, PatchRegistry};
use serde_json::Value;
use std::time::Duration;

/// Error text forwarded to the registry is cut to this many characters.
const MAX_ERROR_QUERY_CHARS: usize = 300;

/// Searches `{base}/assets/search` for promoted patch capsules.
pub struct EvoRegistryClient {
    base_url: String,
    client: reqwest::Client,
}

impl EvoRegistryClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn search_url(&self, signals: &[String], error_text: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&format!("{}/assets/search", self.base_url))
            .map_err(|e| ForgeError::Registry(format!("bad registry url: {e}")))?;
        let error_query: String = error_text.chars().take(MAX_ERROR_QUERY_CHARS).collect();
        url.query_pairs_mut()
            .append_pair("signals", &signals.join(","))
            .append_pair("status", "promoted")
            .append_pair("type", "Capsule")
            .append_pair("limit", "1")
            .append_pair("error", &error_query);
        Ok(url)
    }
}

/// First capsule in either `assets` or `results`; its `solution` may be a
/// string or an inline JSON document.
pub fn parse_search_response(body: &Value) -> Option<PatchCandidate> {
    let first = body
        .get("assets")
        .and_then(|a| a.as_array())
        .and_then(|a| a.first())
        .or_else(|| {
            body.get("results")
                .and_then(|r| r.as_array())
                .and_then(|r| r.first())
        })?;
    let code = match first.get("solution")? {
        Value::String(s) if !s.trim().is_empty() => s.clone(),
        Value::Object(_) | Value::Array(_) => first["solution"].to_string(),
        _ => return None,
    };
    let asset_id = first
        .get("asset_id")
        .or_else(|| first.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    Some(PatchCandidate { asset_id, code })
}

#[async_trait]
impl PatchRegistry for EvoRegistryClient {
    async fn search(&self, signals: &[String], error_text: &str) -> Result<Option<PatchCandidate>> {
        let url = self.search_url(signals, error_text)?;
        tracing::debug!("📡 Patch registry GET {url}");
        let resp = self
            .client
            .get(url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ForgeError::Registry(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ForgeError::Registry(format!("HTTP {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ForgeError::Registry(format!("invalid response: {e}")))?;
        Ok(parse_search_response(&body))
    }
}
