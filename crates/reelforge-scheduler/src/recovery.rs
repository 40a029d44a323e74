//! Recovery sweep: re-dispatch tasks a crash left mid-pipeline.

use chrono::{DateTime, Duration, Utc};
use reelforge_core::error::Result;
use reelforge_core::types::TaskStatus;
use reelforge_pipeline::{ControlPlane, Lane};

pub struct RecoverySweep {
    control: ControlPlane,
    stale_after: Duration,
    prune_after: Option<Duration>,
}

impl RecoverySweep {
    pub fn new(control: ControlPlane, stale_after_minutes: u32, prune_after_days: u32) -> Self {
        Self {
            control,
            stale_after: Duration::minutes(i64::from(stale_after_minutes)),
            prune_after: (prune_after_days > 0).then(|| Duration::days(i64::from(prune_after_days))),
        }
    }

    /// Re-dispatch every non-terminal task untouched since `now - stale_after`,
    /// reusing its id. Tasks this process is already running are skipped.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let ledger = self.control.ledger();
        let dispatcher = self.control.dispatcher();
        let stale = ledger.list_stale(&TaskStatus::IN_FLIGHT, now - self.stale_after)?;
        let mut recovered = 0;
        for task in stale {
            if dispatcher.in_flight(&task.id) {
                continue;
            }
            match dispatcher.dispatch(&task.id, Lane::Recovery) {
                Ok(_) => {
                    recovered += 1;
                    tracing::info!("♻️ Recovering {} (was {})", task.id, task.status);
                }
                Err(e) => tracing::warn!("⚠️ Recovery of {} deferred: {e}", task.id),
            }
        }

        if let Some(age) = self.prune_after {
            let pruned = ledger.prune_payloads(now - age)?;
            if pruned > 0 {
                tracing::info!("🧹 Pruned payloads of {pruned} old task(s)");
            }
        }
        Ok(recovered)
    }
}
