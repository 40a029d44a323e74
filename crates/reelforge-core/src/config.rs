//! ReelForge configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ForgeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub scratch: ScratchConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub quality_gate: QualityGateConfig,
    #[serde(default)]
    pub heartbeats: HeartbeatConfig,
    #[serde(default)]
    pub radar: RadarConfig,
    #[serde(default)]
    pub variant_swap: VariantSwapConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl ForgeConfig {
    /// Load config from the default path (~/.reelforge/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ForgeError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ForgeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Write config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ForgeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// The ReelForge home directory (~/.reelforge).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reelforge")
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Prefer the configured value; fall back to an environment variable.
pub fn secret_or_env(value: &str, env_key: &str) -> String {
    if !value.is_empty() {
        return value.to_string();
    }
    std::env::var(env_key).unwrap_or_default()
}

/// Durable ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Non-terminal tasks untouched for this long are considered interrupted.
    #[serde(default = "default_stale_minutes")]
    pub stale_after_minutes: u32,
    /// Terminal task payloads older than this are blanked (0 = never).
    #[serde(default = "default_prune_days")]
    pub prune_payloads_after_days: u32,
}

fn default_db_path() -> String { "~/.reelforge/ledger.db".into() }
fn default_stale_minutes() -> u32 { 5 }
fn default_prune_days() -> u32 { 30 }

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            stale_after_minutes: default_stale_minutes(),
            prune_payloads_after_days: default_prune_days(),
        }
    }
}

/// Scratch storage for narration and rendered artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchConfig {
    #[serde(default = "default_scratch_dir")]
    pub dir: String,
    /// Looping base visual track muxed under every narration.
    #[serde(default = "default_base_media")]
    pub base_media: String,
}

fn default_scratch_dir() -> String { "~/.reelforge/scratch".into() }
fn default_base_media() -> String { "~/.reelforge/assets/base_footage.mp4".into() }

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            dir: default_scratch_dir(),
            base_media: default_base_media(),
        }
    }
}

/// Worker pool and lane backpressure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Pipelines allowed to run at once across all lanes.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queued tasks allowed per lane before dispatch is refused.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_workers() -> usize { 4 }
fn default_queue_depth() -> usize { 32 }

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Per-channel publish ceilings over rolling windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_hourly")]
    pub hourly: u32,
    #[serde(default = "default_daily")]
    pub daily: u32,
}

fn default_hourly() -> u32 { 5 }
fn default_daily() -> u32 { 20 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            hourly: default_hourly(),
            daily: default_daily(),
        }
    }
}

/// Automation driver and self-heal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// W3C WebDriver endpoint (chromedriver / geckodriver).
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "bool_true")]
    pub headless: bool,
    /// Upload console entry point.
    #[serde(default = "default_studio_url")]
    pub studio_url: String,
    #[serde(default = "default_registry_url")]
    pub patch_registry_url: String,
    /// Heal-and-retry cycles allowed per stage.
    #[serde(default = "default_heal_retries")]
    pub heal_retries: u32,
    #[serde(default = "default_sandbox_timeout")]
    pub sandbox_timeout_secs: u64,
    /// `declarative` (in-process) or `script` (deno subprocess).
    #[serde(default = "default_sandbox_kind")]
    pub sandbox: String,
    #[serde(default = "default_deno_bin")]
    pub deno_bin: String,
    /// Hosts a patch may fetch from.
    #[serde(default)]
    pub allowed_fetch_hosts: Vec<String>,
    /// SHA-256 hex digests of patch code known to be safe.
    #[serde(default)]
    pub trusted_patch_digests: Vec<String>,
    /// Refuse to run patches whose digest is not trusted.
    #[serde(default)]
    pub require_trusted_patches: bool,
    /// Role → CSS selector overrides applied on top of the built-in table.
    #[serde(default)]
    pub locator_overrides: BTreeMap<String, String>,
    /// Pause between publish-flow clicks, in milliseconds.
    #[serde(default = "default_step_pause")]
    pub step_pause_ms: u64,
}

fn bool_true() -> bool { true }
fn default_webdriver_url() -> String { "http://127.0.0.1:9515".into() }
fn default_studio_url() -> String { "https://studio.youtube.com".into() }
fn default_registry_url() -> String { "https://evomap.ai/a2a".into() }
fn default_heal_retries() -> u32 { 2 }
fn default_sandbox_timeout() -> u64 { 5 }
fn default_sandbox_kind() -> String { "declarative".into() }
fn default_deno_bin() -> String { "deno".into() }
fn default_step_pause() -> u64 { 2000 }

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: true,
            studio_url: default_studio_url(),
            patch_registry_url: default_registry_url(),
            heal_retries: default_heal_retries(),
            sandbox_timeout_secs: default_sandbox_timeout(),
            sandbox: default_sandbox_kind(),
            deno_bin: default_deno_bin(),
            allowed_fetch_hosts: Vec::new(),
            trusted_patch_digests: Vec::new(),
            require_trusted_patches: false,
            locator_overrides: BTreeMap::new(),
            step_pause_ms: default_step_pause(),
        }
    }
}

/// Speech + transcoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_transcode_timeout")]
    pub transcode_timeout_secs: u64,
    #[serde(default = "default_tts_endpoint")]
    pub tts_endpoint: String,
    #[serde(default)]
    pub tts_api_key: String,
    #[serde(default = "default_voice")]
    pub voice_id: String,
}

fn default_ffmpeg() -> String { "ffmpeg".into() }
fn default_transcode_timeout() -> u64 { 600 }
fn default_tts_endpoint() -> String { "https://api.elevenlabs.io/v1".into() }
fn default_voice() -> String { "21m00Tcm4TlvDq8ikWAM".into() }

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg(),
            transcode_timeout_secs: default_transcode_timeout(),
            tts_endpoint: default_tts_endpoint(),
            tts_api_key: String::new(),
            voice_id: default_voice(),
        }
    }
}

/// Mutation model (any OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_model_temperature")]
    pub temperature: f32,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

fn default_model_endpoint() -> String { "https://api.openai.com/v1".into() }
fn default_model_name() -> String { "gpt-4o-mini".into() }
fn default_model_temperature() -> f32 { 0.8 }
fn default_model_timeout() -> u64 { 120 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_model_endpoint(),
            api_key: String::new(),
            model: default_model_name(),
            temperature: default_model_temperature(),
            timeout_secs: default_model_timeout(),
        }
    }
}

/// Structural bounds enforced on generated plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateConfig {
    #[serde(default = "default_min_script")]
    pub min_script_chars: usize,
    #[serde(default = "default_max_script")]
    pub max_script_chars: usize,
    #[serde(default = "default_max_title")]
    pub max_title_chars: usize,
    #[serde(default = "default_min_titles")]
    pub min_titles: usize,
    #[serde(default = "default_max_titles")]
    pub max_titles: usize,
    #[serde(default = "default_max_hook")]
    pub max_hook_chars: usize,
}

fn default_min_script() -> usize { 80 }
fn default_max_script() -> usize { 5000 }
fn default_max_title() -> usize { 100 }
fn default_min_titles() -> usize { 1 }
fn default_max_titles() -> usize { 8 }
fn default_max_hook() -> usize { 600 }

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_script_chars: default_min_script(),
            max_script_chars: default_max_script(),
            max_title_chars: default_max_title(),
            min_titles: default_min_titles(),
            max_titles: default_max_titles(),
            max_hook_chars: default_max_hook(),
        }
    }
}

/// Heartbeat periods, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_promoter_secs")]
    pub promoter_secs: u64,
    #[serde(default = "default_radar_secs")]
    pub radar_secs: u64,
    #[serde(default = "bool_true")]
    pub recovery_enabled: bool,
    /// Periodic recovery sweep after the startup sweep (0 = startup only).
    #[serde(default = "default_recovery_secs")]
    pub recovery_secs: u64,
    #[serde(default = "default_variant_swap_secs")]
    pub variant_swap_secs: u64,
}

fn default_promoter_secs() -> u64 { 60 }
fn default_radar_secs() -> u64 { 3600 }
fn default_recovery_secs() -> u64 { 300 }
fn default_variant_swap_secs() -> u64 { 1800 }

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            promoter_secs: default_promoter_secs(),
            radar_secs: default_radar_secs(),
            recovery_enabled: true,
            recovery_secs: default_recovery_secs(),
            variant_swap_secs: default_variant_swap_secs(),
        }
    }
}

/// Discovery feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub feed_url: String,
    /// Minimum views-per-hour for a candidate to become a task.
    #[serde(default = "default_vph_threshold")]
    pub velocity_threshold: f64,
}

fn default_vph_threshold() -> f64 { 3000.0 }

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            feed_url: String::new(),
            velocity_threshold: default_vph_threshold(),
        }
    }
}

/// Underperforming-metadata replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSwapConfig {
    #[serde(default = "default_ctr_threshold")]
    pub ctr_threshold: f64,
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,
}

fn default_ctr_threshold() -> f64 { 0.08 }
fn default_lookback_hours() -> u32 { 24 }

impl Default for VariantSwapConfig {
    fn default() -> Self {
        Self {
            ctr_threshold: default_ctr_threshold(),
            lookback_hours: default_lookback_hours(),
        }
    }
}

/// Inbound HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 51122 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ForgeConfig::parse("").unwrap();
        assert_eq!(config.rate_limit.hourly, 5);
        assert_eq!(config.rate_limit.daily, 20);
        assert_eq!(config.driver.heal_retries, 2);
        assert_eq!(config.ledger.stale_after_minutes, 5);
        assert_eq!(config.heartbeats.promoter_secs, 60);
    }

    #[test]
    fn test_partial_section_override() {
        let config = ForgeConfig::parse(
            r#"
            [rate_limit]
            hourly = 2

            [driver]
            allowed_fetch_hosts = ["cdn.example.com"]
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.hourly, 2);
        assert_eq!(config.rate_limit.daily, 20);
        assert_eq!(config.driver.allowed_fetch_hosts, vec!["cdn.example.com"]);
        assert_eq!(config.driver.sandbox, "declarative");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("reelforge-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut config = ForgeConfig::default();
        config.gateway.port = 4100;
        config.save_to(&path).unwrap();
        let loaded = ForgeConfig::load_from(&path).unwrap();
        assert_eq!(loaded.gateway.port, 4100);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let err = ForgeConfig::parse("[rate_limit]\nhourly = \"many\"").unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }
}
