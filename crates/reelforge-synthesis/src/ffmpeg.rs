//! ffmpeg-backed transcoder.

use async_trait::async_trait;
use reelforge_core::config::SynthesisConfig;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::Transcoder;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

/// Loops the video track under the audio track and stops at the shorter
/// stream, which is always the narration.
pub struct FfmpegTranscoder {
    bin: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(bin: &str, timeout: Duration) -> Self {
        Self {
            bin: bin.to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self::new(&config.ffmpeg_bin, Duration::from_secs(config.transcode_timeout_secs))
    }

    fn args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into(), "-loglevel".into(), "error".into()];
        args.extend(["-stream_loop".into(), "-1".into(), "-i".into(), video.to_string_lossy().to_string()]);
        args.extend(["-i".into(), audio.to_string_lossy().to_string()]);
        for a in [
            "-c:v", "libx264", "-preset", "fast", "-c:a", "aac", "-b:a", "192k", "-map", "0:v:0", "-map",
            "1:a:0", "-shortest", "-pix_fmt", "yuv420p",
        ] {
            args.push(a.to_string());
        }
        args.push(output.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let start = std::time::Instant::now();
        let run = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.bin)
                .args(Self::args(video, audio, output))
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match run {
            Ok(Ok(o)) if o.status.success() => {
                tracing::debug!("🎞️ ffmpeg finished in {:.1}s", start.elapsed().as_secs_f64());
                Ok(())
            }
            Ok(Ok(o)) => {
                let stderr = String::from_utf8_lossy(&o.stderr);
                let tail: String = stderr.chars().rev().take(800).collect::<Vec<_>>().into_iter().rev().collect();
                Err(ForgeError::Synthesis(format!(
                    "ffmpeg exited with {}: {}",
                    o.status.code().unwrap_or(-1),
                    tail.trim()
                )))
            }
            Ok(Err(e)) => Err(ForgeError::Synthesis(format!(
                "'{}' not found or not executable: {e}",
                self.bin
            ))),
            Err(_) => Err(ForgeError::Synthesis(format!(
                "ffmpeg timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}
