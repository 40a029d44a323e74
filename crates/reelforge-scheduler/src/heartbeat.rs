//! Independent interval loops for the four heartbeats.

use chrono::{Local, Utc};
use reelforge_core::config::HeartbeatConfig;
use reelforge_core::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::promoter::SchedulePromoter;
use crate::radar::Radar;
use crate::recovery::RecoverySweep;
use crate::variant_swap::VariantSwapMonitor;

/// Run `work` every `period`. Errors are logged and the loop continues, so
/// one failing heartbeat never stops the others.
pub fn spawn_heartbeat<F, Fut>(name: &'static str, period: Duration, work: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<usize>> + Send,
{
    tokio::spawn(async move {
        tracing::info!("⏰ Heartbeat '{name}' started (every {}s)", period.as_secs());
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match work().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("💓 {name}: {n} item(s)"),
                Err(e) => tracing::warn!("⚠️ Heartbeat '{name}' failed: {e}"),
            }
        }
    })
}

/// The heartbeats a running service owns. Radar is optional.
pub struct Heartbeats {
    pub promoter: Arc<SchedulePromoter>,
    pub radar: Option<Arc<Radar>>,
    pub recovery: Arc<RecoverySweep>,
    pub variant_swap: Arc<VariantSwapMonitor>,
}

impl Heartbeats {
    /// Run the startup recovery sweep, then spawn every loop.
    pub fn spawn(self, config: &HeartbeatConfig) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if config.recovery_enabled {
            match self.recovery.sweep(Utc::now()) {
                Ok(n) => tracing::info!("♻️ Startup recovery re-dispatched {n} task(s)"),
                Err(e) => tracing::warn!("⚠️ Startup recovery failed: {e}"),
            }
            if config.recovery_secs > 0 {
                let recovery = self.recovery.clone();
                let period = Duration::from_secs(config.recovery_secs);
                handles.push(spawn_heartbeat("recovery", period, move || {
                    let recovery = recovery.clone();
                    async move { recovery.sweep(Utc::now()) }
                }));
            }
        }

        let promoter = self.promoter.clone();
        handles.push(spawn_heartbeat(
            "schedule-promoter",
            Duration::from_secs(config.promoter_secs.max(1)),
            move || {
                let promoter = promoter.clone();
                async move { promoter.tick(Local::now().naive_local()) }
            },
        ));

        if let Some(radar) = self.radar {
            handles.push(spawn_heartbeat(
                "radar",
                Duration::from_secs(config.radar_secs.max(1)),
                move || {
                    let radar = radar.clone();
                    async move { radar.tick().await }
                },
            ));
        }

        let swap = self.variant_swap.clone();
        handles.push(spawn_heartbeat(
            "variant-swap",
            Duration::from_secs(config.variant_swap_secs.max(1)),
            move || {
                let swap = swap.clone();
                async move { swap.tick(Utc::now()).await }
            },
        ));

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelforge_core::error::ForgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_failing_heartbeat_keeps_ticking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = spawn_heartbeat("flaky", Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ForgeError::Http("feed down".into()))
            }
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }
}
