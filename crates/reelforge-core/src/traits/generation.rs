//! Opaque outbound calls: mutation model, speech, transcoding, patch registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Generative model producing a structured mutation plan.
#[async_trait]
pub trait MutationModel: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the raw structured plan; validation happens in the quality gate.
    async fn generate(&self, prompt: &str) -> Result<serde_json::Value>;
}

/// Text-to-speech engine.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn speak(&self, text: &str) -> Result<Vec<u8>>;
}

/// Audio/video muxer. Output length follows the shortest input stream.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;
}

/// Code returned by the patch registry for a broken interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCandidate {
    pub asset_id: String,
    pub code: String,
}

/// Remote registry of locator patches.
#[async_trait]
pub trait PatchRegistry: Send + Sync {
    async fn search(&self, signals: &[String], error_text: &str) -> Result<Option<PatchCandidate>>;
}
