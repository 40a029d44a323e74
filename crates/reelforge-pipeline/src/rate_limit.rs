//! Per-channel rolling-window publish ceilings.

use chrono::{DateTime, Duration, Utc};
use reelforge_core::config::RateLimitConfig;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::Ledger;
use std::sync::{Arc, Mutex};

const HOUR_MINUTES: u32 = 60;
const DAY_MINUTES: u32 = 1440;

/// Backed by the ledger's dispatch log, so ceilings survive restarts.
pub struct RateLimiter {
    ledger: Arc<dyn Ledger>,
    windows: [(u32, u32); 2],
    /// Serializes check-then-record across concurrent pipelines.
    gate: Mutex<()>,
}

impl RateLimiter {
    pub fn new(ledger: Arc<dyn Ledger>, config: &RateLimitConfig) -> Self {
        Self {
            ledger,
            windows: [(HOUR_MINUTES, config.hourly), (DAY_MINUTES, config.daily)],
            gate: Mutex::new(()),
        }
    }

    /// `Err(RateLimitExceeded)` if another dispatch for `channel_id` at `now`
    /// would break a ceiling. Records nothing.
    pub fn check(&self, channel_id: &str, now: DateTime<Utc>) -> Result<()> {
        for (window_minutes, ceiling) in self.windows {
            let since = now - Duration::minutes(i64::from(window_minutes));
            let used = self.ledger.count_dispatches(channel_id, since)?;
            if used >= ceiling {
                tracing::warn!(
                    "🚦 Channel {channel_id}: {used}/{ceiling} dispatches in the last {window_minutes} min"
                );
                return Err(ForgeError::RateLimitExceeded {
                    channel_id: channel_id.to_string(),
                    window_minutes,
                    ceiling,
                });
            }
        }
        Ok(())
    }

    /// Check and, when allowed, reserve a slot for `task_id` as one step.
    /// A re-run of the same task replaces its earlier reservation.
    pub fn acquire(&self, channel_id: &str, task_id: &str, now: DateTime<Utc>) -> Result<()> {
        let _guard = self
            .gate
            .lock()
            .map_err(|_| ForgeError::Dispatch("rate limiter lock poisoned".into()))?;
        self.ledger.release_dispatch(channel_id, task_id)?;
        self.check(channel_id, now)?;
        self.ledger.record_dispatch(channel_id, task_id, now)
    }

    /// Hand back the slot `task_id` reserved. Used when a run fails before
    /// anything reached the platform.
    pub fn release(&self, channel_id: &str, task_id: &str) {
        match self.ledger.release_dispatch(channel_id, task_id) {
            Ok(true) => tracing::debug!("🚦 Channel {channel_id}: released slot of {task_id}"),
            Ok(false) => {}
            Err(e) => tracing::warn!("⚠️ Could not release slot of {task_id} on {channel_id}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelforge_ledger::SqliteLedger;

    fn limiter(hourly: u32, daily: u32) -> (Arc<SqliteLedger>, RateLimiter) {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let limiter = RateLimiter::new(ledger.clone(), &RateLimitConfig { hourly, daily });
        (ledger, limiter)
    }

    #[test]
    fn test_sixth_in_hour_is_rejected() {
        let (_ledger, rl) = limiter(5, 20);
        let now = Utc::now();
        for i in 0..5 {
            rl.acquire("c1", &format!("t{i}"), now - Duration::minutes(50 - i)).unwrap();
        }
        let err = rl.acquire("c1", "t5", now).unwrap_err();
        assert!(matches!(err, ForgeError::RateLimitExceeded { window_minutes: 60, ceiling: 5, .. }));
        // Other channels are unaffected.
        rl.acquire("c2", "t6", now).unwrap();
    }

    #[test]
    fn test_hour_window_rolls() {
        let (_ledger, rl) = limiter(5, 20);
        let now = Utc::now();
        for i in 0..5 {
            rl.acquire("c1", &format!("t{i}"), now - Duration::minutes(61 + i)).unwrap();
        }
        rl.check("c1", now).unwrap();
    }

    #[test]
    fn test_twenty_first_in_day_is_rejected() {
        let (ledger, rl) = limiter(5, 20);
        let now = Utc::now();
        for i in 0..20 {
            ledger
                .record_dispatch("c1", &format!("t{i}"), now - Duration::hours(2 + i64::from(i % 20)))
                .unwrap();
        }
        let err = rl.acquire("c1", "t20", now).unwrap_err();
        assert!(matches!(err, ForgeError::RateLimitExceeded { window_minutes: 1440, ceiling: 20, .. }));
    }

    #[test]
    fn test_rejection_records_nothing() {
        let (ledger, rl) = limiter(1, 20);
        let now = Utc::now();
        rl.acquire("c1", "t1", now).unwrap();
        assert!(rl.acquire("c1", "t2", now).is_err());
        assert_eq!(ledger.count_dispatches("c1", now - Duration::minutes(60)).unwrap(), 1);
    }

    #[test]
    fn test_rerun_replaces_its_own_reservation() {
        let (ledger, rl) = limiter(1, 20);
        let now = Utc::now();
        rl.acquire("c1", "t1", now - Duration::minutes(30)).unwrap();
        rl.acquire("c1", "t1", now).unwrap();
        assert_eq!(ledger.count_dispatches("c1", now - Duration::minutes(60)).unwrap(), 1);
        assert!(rl.acquire("c1", "t2", now).is_err());
    }

    #[test]
    fn test_release_frees_the_slot() {
        let (ledger, rl) = limiter(1, 20);
        let now = Utc::now();
        rl.acquire("c1", "t1", now).unwrap();
        rl.release("c1", "t1");
        assert_eq!(ledger.count_dispatches("c1", now - Duration::minutes(60)).unwrap(), 0);
        rl.acquire("c1", "t2", now).unwrap();
        // Releasing a slot that was never held is a no-op.
        rl.release("c1", "t9");
        assert!(rl.acquire("c1", "t3", now).is_err());
    }

    #[test]
    fn test_concurrent_acquires_admit_one() {
        let (ledger, rl) = limiter(1, 20);
        let rl = Arc::new(rl);
        let now = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let rl = rl.clone();
                std::thread::spawn(move || rl.acquire("c1", &format!("t{i}"), now).is_ok())
            })
            .collect();
        let admitted = handles.into_iter().filter_map(|h| h.join().ok()).filter(|ok| *ok).count();
        assert_eq!(admitted, 1);
        assert_eq!(ledger.count_dispatches("c1", now - Duration::minutes(60)).unwrap(), 1);
    }
}
