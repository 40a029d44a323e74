//! HTTP text-to-speech client (ElevenLabs-compatible API).

use async_trait::async_trait;
use reelforge_core::config::{SynthesisConfig, secret_or_env};
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::SpeechEngine;
use serde_json::json;
use std::time::Duration;

pub struct HttpSpeechEngine {
    endpoint: String,
    api_key: String,
    voice_id: String,
    client: reqwest::Client,
}

impl HttpSpeechEngine {
    pub fn new(endpoint: &str, api_key: &str, voice_id: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            voice_id: voice_id.to_string(),
            client,
        }
    }

    /// Key from config, else `REELFORGE_TTS_API_KEY`.
    pub fn from_config(config: &SynthesisConfig) -> Self {
        let key = secret_or_env(&config.tts_api_key, "REELFORGE_TTS_API_KEY");
        Self::new(&config.tts_endpoint, &key, &config.voice_id)
    }

    fn url(&self) -> String {
        format!("{}/text-to-speech/{}", self.endpoint, self.voice_id)
    }
}

#[async_trait]
impl SpeechEngine for HttpSpeechEngine {
    async fn speak(&self, text: &str) -> Result<Vec<u8>> {
        if self.api_key.is_empty() {
            return Err(ForgeError::Config(
                "TTS API key missing (synthesis.tts_api_key or REELFORGE_TTS_API_KEY)".into(),
            ));
        }
        let body = json!({
            "text": text,
            "model_id": "eleven_multilingual_v2",
            "voice_settings": { "stability": 0.5, "similarity_boost": 0.75 }
        });
        let resp = self
            .client
            .post(self.url())
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Synthesis(format!("TTS request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let text: String = text.chars().take(300).collect();
            return Err(ForgeError::Synthesis(format!("TTS HTTP {status}: {text}")));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ForgeError::Synthesis(format!("TTS body: {e}")))?;
        Ok(bytes.to_vec())
    }
}
