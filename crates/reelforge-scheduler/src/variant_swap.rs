//! Variant swap: replace underperforming titles with pre-generated ones.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::{Ledger, MetricsSource};
use reelforge_core::types::{ContentSummary, VariantKind};
use reelforge_driver::AutomationDriver;
use std::sync::Arc;

/// CTR assumed for content with no recorded sample.
pub const DEFAULT_CTR: f64 = 0.10;

/// Reads the latest recorded sample from the ledger.
pub struct LedgerMetrics {
    ledger: Arc<dyn Ledger>,
}

impl LedgerMetrics {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl MetricsSource for LedgerMetrics {
    async fn performance(&self, task_id: &str) -> Result<f64> {
        Ok(self
            .ledger
            .latest_metric(task_id)?
            .map(|s| s.ctr)
            .unwrap_or(DEFAULT_CTR))
    }
}

pub struct VariantSwapMonitor {
    ledger: Arc<dyn Ledger>,
    driver: Arc<AutomationDriver>,
    metrics: Arc<dyn MetricsSource>,
    ctr_threshold: f64,
    lookback: Duration,
}

impl VariantSwapMonitor {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        driver: Arc<AutomationDriver>,
        metrics: Arc<dyn MetricsSource>,
        ctr_threshold: f64,
        lookback_hours: u32,
    ) -> Self {
        Self {
            ledger,
            driver,
            metrics,
            ctr_threshold,
            lookback: Duration::hours(i64::from(lookback_hours)),
        }
    }

    /// Check content published since `now - lookback`; swap titles below
    /// the threshold. Returns how many were swapped.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let contents = self.ledger.recent_contents(now - self.lookback)?;
        let mut swapped = 0;
        for content in contents {
            match self.check(&content, now).await {
                Ok(true) => swapped += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("⚠️ Variant swap for {} failed: {e}", content.task_id),
            }
        }
        Ok(swapped)
    }

    async fn check(&self, content: &ContentSummary, now: DateTime<Utc>) -> Result<bool> {
        let ctr = self.metrics.performance(&content.task_id).await?;
        let variants = self.ledger.list_variants(&content.task_id)?;
        if let Some(active) = variants.iter().find(|v| v.kind == VariantKind::Title && v.is_active) {
            self.ledger.set_variant_performance(&active.id, ctr)?;
        }
        if ctr >= self.ctr_threshold {
            return Ok(false);
        }

        let Some(next) = self.ledger.next_unused_variant(&content.task_id, VariantKind::Title)? else {
            tracing::debug!("🔁 {} underperforms ({ctr:.3}) but has no variants left", content.task_id);
            return Ok(false);
        };
        let channel_id = content
            .channel_id
            .as_deref()
            .ok_or_else(|| ForgeError::Validation(format!("content {} has no channel", content.task_id)))?;
        let channel = self
            .ledger
            .get_channel(channel_id)?
            .ok_or_else(|| ForgeError::NotFound(format!("channel {channel_id}")))?;

        self.driver
            .update_metadata(&channel, &content.published_url, &next.content)
            .await?;
        self.ledger.activate_variant(&next.id, now)?;
        let mut updated = content.clone();
        updated.title = next.content.clone();
        self.ledger.record_content(&updated)?;
        tracing::info!(
            "🔁 {} CTR {ctr:.3} < {:.3}: title → '{}'",
            content.task_id,
            self.ctr_threshold,
            next.content
        );
        Ok(true)
    }
}
