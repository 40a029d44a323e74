//! Persistence boundary. Implementations perform no business logic.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::Result;
use crate::types::*;

pub trait Ledger: Send + Sync {
    // ─── Tasks ──────────────────────────────────────────────

    /// Insert-or-update by id, refreshing `updated_at`. A status change
    /// appends a row to the task's history.
    fn upsert_task(&self, task: &Task) -> Result<()>;

    fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// Most recent first.
    fn list_tasks(&self, limit: usize) -> Result<Vec<Task>>;

    /// Most recent first, restricted to one origin.
    fn list_tasks_by_origin(&self, origin: TaskOrigin, limit: usize) -> Result<Vec<Task>>;

    /// Tasks in `statuses` whose `updated_at` predates `older_than`.
    fn list_stale(&self, statuses: &[TaskStatus], older_than: DateTime<Utc>) -> Result<Vec<Task>>;

    fn task_history(&self, id: &str) -> Result<Vec<TaskEvent>>;

    /// Blank the payload of terminal tasks last touched before `older_than`.
    fn prune_payloads(&self, older_than: DateTime<Utc>) -> Result<usize>;

    // ─── Channels ───────────────────────────────────────────

    fn upsert_channel(&self, channel: &Channel) -> Result<()>;

    fn get_channel(&self, id: &str) -> Result<Option<Channel>>;

    fn list_channels(&self) -> Result<Vec<Channel>>;

    fn refresh_credentials(&self, id: &str, blob: &str, at: DateTime<Utc>) -> Result<()>;

    // ─── Schedules ──────────────────────────────────────────

    fn upsert_schedule(&self, entry: &ScheduleEntry) -> Result<()>;

    fn list_schedules(&self) -> Result<Vec<ScheduleEntry>>;

    fn delete_schedule(&self, id: &str) -> Result<bool>;

    /// `scheduled` entries whose local publish time is at or before `now`.
    fn list_pending_schedule(&self, now: NaiveDateTime) -> Result<Vec<ScheduleEntry>>;

    /// Flip `scheduled → processing`. `false` when another tick won the claim.
    fn claim_schedule(&self, id: &str) -> Result<bool>;

    fn finish_schedule(&self, id: &str, status: ScheduleStatus, error: Option<&str>) -> Result<()>;

    // ─── Rate-limit log ─────────────────────────────────────

    fn record_dispatch(&self, channel_id: &str, task_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Drop the reservation `task_id` holds on `channel_id`. `false` when none existed.
    fn release_dispatch(&self, channel_id: &str, task_id: &str) -> Result<bool>;

    fn count_dispatches(&self, channel_id: &str, since: DateTime<Utc>) -> Result<u32>;

    // ─── Published content & variants ───────────────────────

    fn record_content(&self, summary: &ContentSummary) -> Result<()>;

    fn get_content(&self, task_id: &str) -> Result<Option<ContentSummary>>;

    fn recent_contents(&self, since: DateTime<Utc>) -> Result<Vec<ContentSummary>>;

    fn insert_variants(&self, variants: &[ContentVariant]) -> Result<()>;

    fn list_variants(&self, parent_task_id: &str) -> Result<Vec<ContentVariant>>;

    /// Inactive, never-swapped variant of `kind`, oldest first.
    fn next_unused_variant(&self, parent_task_id: &str, kind: VariantKind) -> Result<Option<ContentVariant>>;

    /// Make `variant_id` the only active variant of its kind for its parent.
    fn activate_variant(&self, variant_id: &str, at: DateTime<Utc>) -> Result<()>;

    fn set_variant_performance(&self, variant_id: &str, performance: f64) -> Result<()>;

    // ─── Metrics ────────────────────────────────────────────

    fn record_metric(&self, sample: &PerformanceSample) -> Result<()>;

    fn latest_metric(&self, task_id: &str) -> Result<Option<PerformanceSample>>;

    // ─── Patch cache ────────────────────────────────────────

    fn record_patch(&self, asset_id: &str, query: &str, solution: &str) -> Result<()>;

    fn cached_patch(&self, query: &str) -> Result<Option<CachedPatch>>;
}
