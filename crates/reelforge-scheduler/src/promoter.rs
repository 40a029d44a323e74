//! Schedule promoter: due entries become tasks.

use chrono::NaiveDateTime;
use reelforge_core::error::Result;
use reelforge_core::traits::Ledger;
use reelforge_core::types::{ScheduleEntry, ScheduleStatus, Task, TaskOrigin};
use reelforge_pipeline::ControlPlane;
use std::sync::Arc;

pub struct SchedulePromoter {
    control: ControlPlane,
}

impl SchedulePromoter {
    pub fn new(control: ControlPlane) -> Self {
        Self { control }
    }

    fn ledger(&self) -> &Arc<dyn Ledger> {
        self.control.ledger()
    }

    /// Claim and dispatch every entry due at local time `now`. Returns how
    /// many were dispatched. Each entry becomes `published` or `failed`
    /// when its task ends; the tick itself never waits for that.
    pub fn tick(&self, now: NaiveDateTime) -> Result<usize> {
        let due = self.ledger().list_pending_schedule(now)?;
        let mut promoted = 0;
        for entry in due {
            // Claim before acting: an overlapping tick sees the flip and skips.
            if !self.ledger().claim_schedule(&entry.id)? {
                tracing::debug!("⏭️ Schedule {} claimed elsewhere", entry.id);
                continue;
            }
            match self.promote(&entry) {
                Ok(()) => promoted += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Schedule {} not dispatched, will retry: {e}", entry.id);
                    let mut retry = entry.clone();
                    retry.status = ScheduleStatus::Scheduled;
                    self.ledger().upsert_schedule(&retry)?;
                }
            }
        }
        Ok(promoted)
    }

    fn promote(&self, entry: &ScheduleEntry) -> Result<()> {
        let task = Task::new(
            entry.task_id(),
            entry.payload.clone(),
            TaskOrigin::Schedule,
            entry.target_channel_id.clone(),
        );
        let handle = self.control.enqueue(&task)?;
        tracing::info!("🗓️ Schedule {} promoted as {}", entry.id, task.id);

        let ledger = self.ledger().clone();
        let schedule_id = entry.id.clone();
        tokio::spawn(async move {
            let (status, error) = match handle.outcome().await {
                Ok(outcome) if outcome.is_success() => (ScheduleStatus::Published, None),
                Ok(outcome) => (ScheduleStatus::Failed, outcome.error),
                Err(e) => (ScheduleStatus::Failed, Some(e.to_string())),
            };
            if let Err(e) = ledger.finish_schedule(&schedule_id, status, error.as_deref()) {
                tracing::warn!("⚠️ Could not close schedule {schedule_id}: {e}");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, control_plane};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::time::Duration;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn entry(id: &str, h: u32) -> ScheduleEntry {
        ScheduleEntry {
            id: id.into(),
            title: String::new(),
            platform: "youtube".into(),
            payload: json!({"source_url": format!("https://youtu.be/{id}")}),
            publish_time_local: at(h),
            status: ScheduleStatus::Scheduled,
            target_channel_id: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_due_entries_promoted_once() {
        let (control, runner) = control_plane(Scripted::succeed());
        control.ledger().upsert_schedule(&entry("s1", 8)).unwrap();
        control.ledger().upsert_schedule(&entry("s2", 12)).unwrap();
        let promoter = SchedulePromoter::new(control.clone());

        assert_eq!(promoter.tick(at(9)).unwrap(), 1);
        // A second overlapping tick finds nothing left to claim.
        assert_eq!(promoter.tick(at(9)).unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let schedules = control.ledger().list_schedules().unwrap();
        let s1 = schedules.iter().find(|s| s.id == "s1").unwrap();
        assert_eq!(s1.status, ScheduleStatus::Published);
        let s2 = schedules.iter().find(|s| s.id == "s2").unwrap();
        assert_eq!(s2.status, ScheduleStatus::Scheduled);
        assert_eq!(runner.runs(), vec!["sched_s1"]);
        let task = control.ledger().get_task("sched_s1").unwrap().unwrap();
        assert_eq!(task.origin, TaskOrigin::Schedule);
    }

    #[tokio::test]
    async fn test_failed_task_marks_entry_failed() {
        let (control, _runner) = control_plane(Scripted::fail("RateLimitExceeded"));
        control.ledger().upsert_schedule(&entry("s1", 8)).unwrap();
        SchedulePromoter::new(control.clone()).tick(at(9)).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let s1 = control.ledger().list_schedules().unwrap().remove(0);
        assert_eq!(s1.status, ScheduleStatus::Failed);
        assert_eq!(s1.error.as_deref(), Some("RateLimitExceeded"));
    }
}
