//! Script → narrated video.

use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::{SpeechEngine, Transcoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Scratch files belonging to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub narration: PathBuf,
    pub output: PathBuf,
}

impl ArtifactPaths {
    pub fn for_task(scratch_dir: &Path, task_id: &str) -> Self {
        Self {
            narration: scratch_dir.join(format!("{task_id}_narration.mp3")),
            output: scratch_dir.join(format!("final_{task_id}.mp4")),
        }
    }

    /// Delete whichever of the files exist. Returns how many were removed.
    pub async fn remove(&self) -> usize {
        let mut removed = 0;
        for path in [&self.narration, &self.output] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("⚠️ Could not remove {}: {e}", path.display()),
            }
        }
        removed
    }
}

/// Task id owning a scratch file name, if the name is one of ours.
pub fn task_id_of(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix("_narration.mp3")
        .or_else(|| file_name.strip_prefix("final_").and_then(|s| s.strip_suffix(".mp4")))
        .filter(|id| !id.is_empty())
}

pub struct SynthesisService {
    speech: Arc<dyn SpeechEngine>,
    transcoder: Arc<dyn Transcoder>,
    scratch_dir: PathBuf,
}

impl SynthesisService {
    pub fn new(speech: Arc<dyn SpeechEngine>, transcoder: Arc<dyn Transcoder>, scratch_dir: PathBuf) -> Self {
        Self {
            speech,
            transcoder,
            scratch_dir,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Render `script` to speech and mux it over `base_media`.
    ///
    /// The narration file is always removed before returning. On failure
    /// the output file is removed too, so an error leaves nothing behind.
    pub async fn synthesize(&self, script: &str, base_media: &Path, task_id: &str) -> Result<PathBuf> {
        if script.trim().is_empty() {
            return Err(ForgeError::Synthesis("empty script".into()));
        }
        if !base_media.exists() {
            return Err(ForgeError::Synthesis(format!(
                "base media not found: {}",
                base_media.display()
            )));
        }
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| ForgeError::Synthesis(format!("create scratch dir: {e}")))?;

        let paths = ArtifactPaths::for_task(&self.scratch_dir, task_id);
        let result = self.render(script, base_media, &paths).await;

        if let Err(e) = tokio::fs::remove_file(&paths.narration).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("⚠️ Could not remove narration {}: {e}", paths.narration.display());
            }
        }
        match result {
            Ok(()) => {
                tracing::info!("🎬 Synthesized {}", paths.output.display());
                Ok(paths.output)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&paths.output).await;
                Err(e)
            }
        }
    }

    async fn render(&self, script: &str, base_media: &Path, paths: &ArtifactPaths) -> Result<()> {
        tracing::debug!("🗣️ Rendering narration ({} chars)", script.chars().count());
        let audio = self
            .speech
            .speak(script)
            .await
            .map_err(as_synthesis_error)?;
        if audio.is_empty() {
            return Err(ForgeError::Synthesis("speech engine returned no audio".into()));
        }
        tokio::fs::write(&paths.narration, &audio)
            .await
            .map_err(|e| ForgeError::Synthesis(format!("write narration: {e}")))?;

        self.transcoder
            .mux(base_media, &paths.narration, &paths.output)
            .await
            .map_err(as_synthesis_error)?;
        if !paths.output.exists() {
            return Err(ForgeError::Synthesis("transcoder produced no output".into()));
        }
        Ok(())
    }
}

fn as_synthesis_error(e: ForgeError) -> ForgeError {
    match e {
        ForgeError::Synthesis(_) => e,
        other => ForgeError::Synthesis(other.to_string()),
    }
}
