//! Persisted data model: tasks, channels, schedules, variants.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline status of a task.
///
/// Progression is `Scraping → Mutating → Muxing → Uploading → Completed`;
/// any non-terminal state may fall sideways into `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scraping,
    Mutating,
    Muxing,
    Uploading,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Statuses a crashed process can leave behind.
    pub const IN_FLIGHT: [TaskStatus; 4] = [
        TaskStatus::Scraping,
        TaskStatus::Mutating,
        TaskStatus::Muxing,
        TaskStatus::Uploading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scraping => "scraping",
            TaskStatus::Mutating => "mutating",
            TaskStatus::Muxing => "muxing",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scraping" => Some(TaskStatus::Scraping),
            "mutating" => Some(TaskStatus::Mutating),
            "muxing" => Some(TaskStatus::Muxing),
            "uploading" => Some(TaskStatus::Uploading),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Position in the stage sequence; `None` for `Failed`.
    fn rank(&self) -> Option<u8> {
        match self {
            TaskStatus::Scraping => Some(0),
            TaskStatus::Mutating => Some(1),
            TaskStatus::Muxing => Some(2),
            TaskStatus::Uploading => Some(3),
            TaskStatus::Completed => Some(4),
            TaskStatus::Failed => None,
        }
    }

    /// Forward moves (skipping allowed) or a sideways move into `Failed`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(cur), Some(nxt)) => nxt > cur,
            (None, Some(_)) => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who created a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    Manual,
    Schedule,
    Radar,
}

impl TaskOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOrigin::Manual => "manual",
            TaskOrigin::Schedule => "schedule",
            TaskOrigin::Radar => "radar",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "schedule" => TaskOrigin::Schedule,
            "radar" => TaskOrigin::Radar,
            _ => TaskOrigin::Manual,
        }
    }
}

/// Task kind for the scrape → mutate → synthesize → publish pipeline.
pub const KIND_REMIX_SHORT: &str = "remix_short";

/// One pipeline work unit. `id` doubles as the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: String,
    /// Opaque to the ledger; the orchestrator reads it as a [`SourcePayload`].
    pub payload: serde_json::Value,
    pub origin: TaskOrigin,
    pub status: TaskStatus,
    pub target_channel_id: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Number of times the orchestrator has entered `Scraping` for this id.
    #[serde(default)]
    pub attempt: u32,
}

impl Task {
    /// A fresh task entering the pipeline at `Scraping`.
    pub fn new(
        id: impl Into<String>,
        payload: serde_json::Value,
        origin: TaskOrigin,
        target_channel_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            kind: KIND_REMIX_SHORT.to_string(),
            payload,
            origin,
            status: TaskStatus::Scraping,
            target_channel_id,
            error: None,
            updated_at: now,
            attempt: 0,
        }
    }

    /// Generate a task id with the given prefix.
    pub fn new_id(prefix: &str) -> String {
        let t = Utc::now();
        format!(
            "{}_{:x}{:08x}",
            prefix,
            t.timestamp_millis(),
            t.timestamp_subsec_nanos()
        )
    }
}

/// Source material a task points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePayload {
    pub source_url: String,
    #[serde(default)]
    pub title: String,
}

impl SourcePayload {
    pub fn from_value(value: &serde_json::Value) -> crate::Result<Self> {
        let payload: Self = serde_json::from_value(value.clone())
            .map_err(|e| crate::ForgeError::Validation(format!("task payload: {e}")))?;
        if payload.source_url.trim().is_empty() {
            return Err(crate::ForgeError::Validation(
                "task payload: empty source_url".into(),
            ));
        }
        Ok(payload)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "source_url": self.source_url, "title": self.title })
    }
}

/// One row of a task's status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub status: TaskStatus,
    pub attempt: u32,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Active,
    Paused,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Active => "active",
            ChannelStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "paused" {
            ChannelStatus::Paused
        } else {
            ChannelStatus::Active
        }
    }
}

/// A publishing destination account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub display_name: String,
    pub platform: String,
    #[serde(default)]
    pub niche: String,
    pub status: ChannelStatus,
    /// Opaque browser session material (serialized cookies).
    #[serde(default, skip_serializing)]
    pub credential_blob: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn new(id: &str, display_name: &str, niche: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            platform: "youtube".to_string(),
            niche: niche.to_string(),
            status: ChannelStatus::Active,
            credential_blob: None,
            last_refreshed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Processing,
    Published,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Processing => "processing",
            ScheduleStatus::Published => "published",
            ScheduleStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => ScheduleStatus::Processing,
            "published" => ScheduleStatus::Published,
            "failed" => ScheduleStatus::Failed,
            _ => ScheduleStatus::Scheduled,
        }
    }
}

/// A publish planned for a local wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub platform: String,
    pub payload: serde_json::Value,
    pub publish_time_local: NaiveDateTime,
    pub status: ScheduleStatus,
    #[serde(default)]
    pub target_channel_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScheduleEntry {
    /// Task id derived from the entry, so a re-promoted entry reuses it.
    pub fn task_id(&self) -> String {
        format!("sched_{}", self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Title,
    ThumbnailPrompt,
}

impl VariantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantKind::Title => "title",
            VariantKind::ThumbnailPrompt => "thumbnail_prompt",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "thumbnail_prompt" {
            VariantKind::ThumbnailPrompt
        } else {
            VariantKind::Title
        }
    }
}

/// Pre-generated alternative metadata for a published task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentVariant {
    pub id: String,
    pub parent_task_id: String,
    pub kind: VariantKind,
    pub content: String,
    pub is_active: bool,
    pub observed_performance: f64,
    /// Set once the variant has been swapped in; used variants are never picked again.
    pub swapped_at: Option<DateTime<Utc>>,
}

/// What was published for a completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSummary {
    pub task_id: String,
    pub channel_id: Option<String>,
    pub title: String,
    pub script: String,
    pub published_url: String,
    pub published_at: DateTime<Utc>,
}

/// A performance observation for published content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub task_id: String,
    /// Click-through rate in `0.0..=1.0`.
    pub ctr: f64,
    pub views: u64,
    pub at: DateTime<Utc>,
}

/// A locator patch remembered after it healed a live table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPatch {
    pub asset_id: String,
    pub query: String,
    pub solution: String,
    pub at: DateTime<Utc>,
}
