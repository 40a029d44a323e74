//! Discovery radar: turns fast-rising candidates into tasks.

use async_trait::async_trait;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::{Candidate, SignalSource};
use reelforge_core::types::{Channel, ChannelStatus, SourcePayload, Task, TaskOrigin};
use reelforge_pipeline::ControlPlane;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Polls a JSON feed returning either a list of candidates or
/// `{"candidates": [...]}`.
pub struct FeedSignalSource {
    url: String,
    client: reqwest::Client,
}

impl FeedSignalSource {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.to_string(),
            client,
        }
    }
}

/// Candidates in a feed body. Malformed entries are skipped.
pub fn parse_feed(body: &Value) -> Vec<Candidate> {
    let items = body
        .as_array()
        .or_else(|| body.get("candidates").and_then(|c| c.as_array()));
    items
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value::<Candidate>(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SignalSource for FeedSignalSource {
    async fn poll(&self) -> Result<Vec<Candidate>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ForgeError::Http(format!("radar feed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ForgeError::Http(format!("radar feed HTTP {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ForgeError::Http(format!("radar feed body: {e}")))?;
        Ok(parse_feed(&body))
    }
}

pub struct Radar {
    control: ControlPlane,
    source: Arc<dyn SignalSource>,
    velocity_threshold: f64,
}

impl Radar {
    pub fn new(control: ControlPlane, source: Arc<dyn SignalSource>, velocity_threshold: f64) -> Self {
        Self {
            control,
            source,
            velocity_threshold,
        }
    }

    /// Poll once and dispatch every new candidate over the threshold.
    pub async fn tick(&self) -> Result<usize> {
        let candidates = self.source.poll().await?;
        let channels = self.control.list_channels()?;
        let mut created = 0;
        for candidate in candidates {
            if candidate.velocity < self.velocity_threshold {
                continue;
            }
            let task_id = task_id_for(&candidate.source_id);
            if self.control.ledger().get_task(&task_id)?.is_some() {
                continue;
            }
            let Some(channel) = route(&channels, candidate.niche.as_deref()) else {
                tracing::warn!("🛰️ No active channel for '{}', skipping", candidate.title);
                continue;
            };
            let payload = SourcePayload {
                source_url: candidate.url.clone(),
                title: candidate.title.clone(),
            };
            let task = Task::new(task_id, payload.to_value(), TaskOrigin::Radar, Some(channel.id.clone()));
            match self.control.enqueue(&task) {
                Ok(_) => {
                    created += 1;
                    tracing::info!(
                        "🛰️ Radar hit: '{}' at {:.0} vph → {} on {}",
                        candidate.title,
                        candidate.velocity,
                        task.id,
                        channel.id
                    );
                }
                Err(e) => tracing::warn!("⚠️ Radar could not dispatch {}: {e}", task.id),
            }
        }
        Ok(created)
    }
}

/// Stable task id per source, so a candidate seen on several polls is
/// dispatched once.
fn task_id_for(source_id: &str) -> String {
    let clean: String = source_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("radar_{clean}")
}

/// Active channel whose niche matches, else the first active channel.
fn route<'a>(channels: &'a [Channel], niche: Option<&str>) -> Option<&'a Channel> {
    let active = || channels.iter().filter(|c| c.status == ChannelStatus::Active);
    niche
        .and_then(|n| active().find(|c| c.niche.eq_ignore_ascii_case(n)))
        .or_else(|| active().next())
}
