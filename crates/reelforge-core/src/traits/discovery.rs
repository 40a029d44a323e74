//! Inputs for the radar and variant-swap heartbeats.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Candidate source material surfaced by an external signal feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_id: String,
    pub title: String,
    pub url: String,
    /// Engagement velocity (views per hour).
    pub velocity: f64,
    #[serde(default)]
    pub niche: Option<String>,
}

#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn poll(&self) -> Result<Vec<Candidate>>;
}

/// Reads the live performance metric (CTR) of published content.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn performance(&self, task_id: &str) -> Result<f64>;
}
