//! Route handlers. Every response is `{"ok": bool, ...}`.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::NaiveDateTime;
use reelforge_core::error::ForgeError;
use reelforge_core::types::{Channel, ChannelStatus, ScheduleEntry, ScheduleStatus, TaskOrigin};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::server::AppState;

type Reply = (StatusCode, Json<Value>);

fn ok(body: Value) -> Reply {
    (StatusCode::OK, Json(body))
}

fn fail(e: ForgeError) -> Reply {
    let status = match &e {
        ForgeError::NotFound(_) => StatusCode::NOT_FOUND,
        ForgeError::Validation(_) => StatusCode::BAD_REQUEST,
        ForgeError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Gateway request failed: {e}");
    }
    (status, Json(json!({"ok": false, "error": e.to_string()})))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Reply {
    ok(json!({
        "ok": true,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "lanes": state.control.dispatcher().stats(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    /// Full payload; alternatively `source_url` + `title`.
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub target_channel_id: Option<String>,
}

pub async fn submit_task(State(state): State<Arc<AppState>>, Json(req): Json<SubmitTaskRequest>) -> Reply {
    let payload = match (req.payload, req.source_url) {
        (Some(p), _) => p,
        (None, Some(url)) => json!({"source_url": url, "title": req.title.unwrap_or_default()}),
        (None, None) => return fail(ForgeError::Validation("payload or source_url required".into())),
    };
    match state
        .control
        .submit_task(payload, TaskOrigin::Manual, req.target_channel_id)
    {
        Ok(task_id) => ok(json!({"ok": true, "task_id": task_id})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// `radar` gives the breakout feed.
    #[serde(default)]
    pub origin: Option<TaskOrigin>,
}

fn default_limit() -> usize {
    50
}

pub async fn list_tasks(State(state): State<Arc<AppState>>, Query(q): Query<ListQuery>) -> Reply {
    let limit = q.limit.min(500);
    let tasks = match q.origin {
        Some(origin) => state.control.list_tasks_from(origin, limit),
        None => state.control.list_tasks(limit),
    };
    match tasks {
        Ok(tasks) => ok(json!({"ok": true, "tasks": tasks})),
        Err(e) => fail(e),
    }
}

pub async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Reply {
    match state.control.task_detail(&id) {
        Ok((task, history)) => ok(json!({"ok": true, "task": task, "history": history})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    pub payload: Value,
    /// Local wall-clock time, e.g. `2026-03-01T09:30:00`.
    pub publish_time_local: NaiveDateTime,
    #[serde(default)]
    pub target_channel_id: Option<String>,
}

fn default_platform() -> String {
    "youtube".into()
}

pub async fn list_schedules(State(state): State<Arc<AppState>>) -> Reply {
    match state.control.list_schedules() {
        Ok(schedules) => ok(json!({"ok": true, "schedules": schedules})),
        Err(e) => fail(e),
    }
}

pub async fn upsert_schedule(State(state): State<Arc<AppState>>, Json(req): Json<ScheduleRequest>) -> Reply {
    let entry = ScheduleEntry {
        id: req.id,
        title: req.title,
        platform: req.platform,
        payload: req.payload,
        publish_time_local: req.publish_time_local,
        status: ScheduleStatus::Scheduled,
        target_channel_id: req.target_channel_id,
        error: None,
    };
    match state.control.upsert_schedule(entry) {
        Ok(saved) => ok(json!({"ok": true, "schedule": saved})),
        Err(e) => fail(e),
    }
}

pub async fn delete_schedule(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Reply {
    match state.control.delete_schedule(&id) {
        Ok(true) => ok(json!({"ok": true})),
        Ok(false) => fail(ForgeError::NotFound(format!("schedule {id}"))),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChannelRequest {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub niche: String,
    #[serde(default)]
    pub paused: bool,
    /// Exported browser cookies (JSON array) for the channel's account.
    #[serde(default)]
    pub credential_blob: Option<String>,
}

pub async fn list_channels(State(state): State<Arc<AppState>>) -> Reply {
    match state.control.list_channels() {
        Ok(channels) => ok(json!({"ok": true, "channels": channels})),
        Err(e) => fail(e),
    }
}

pub async fn register_channel(State(state): State<Arc<AppState>>, Json(req): Json<ChannelRequest>) -> Reply {
    let mut channel = Channel::new(&req.id, &req.display_name, &req.niche);
    channel.platform = req.platform;
    channel.credential_blob = req.credential_blob;
    if req.paused {
        channel.status = ChannelStatus::Paused;
    }
    match state.control.register_channel(channel) {
        Ok(saved) => ok(json!({"ok": true, "channel": saved})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct MetricRequest {
    pub task_id: String,
    pub ctr: f64,
    #[serde(default)]
    pub views: u64,
}

pub async fn record_metric(State(state): State<Arc<AppState>>, Json(req): Json<MetricRequest>) -> Reply {
    match state.control.record_metric(&req.task_id, req.ctr, req.views) {
        Ok(sample) => ok(json!({"ok": true, "sample": sample})),
        Err(e) => fail(e),
    }
}
