//! Inbound control plane: task submission, schedules, channels, audit feed.
//!
//! The HTTP gateway and the CLI both go through here.

use chrono::Utc;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::Ledger;
use reelforge_core::types::{
    Channel, PerformanceSample, ScheduleEntry, ScheduleStatus, SourcePayload, Task, TaskEvent, TaskOrigin,
    TaskStatus,
};
use std::sync::Arc;

use crate::dispatcher::{DispatchHandle, Dispatcher, Lane};

#[derive(Clone)]
pub struct ControlPlane {
    ledger: Arc<dyn Ledger>,
    dispatcher: Dispatcher,
}

impl ControlPlane {
    pub fn new(ledger: Arc<dyn Ledger>, dispatcher: Dispatcher) -> Self {
        Self { ledger, dispatcher }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Persist a new task at `scraping` and dispatch it. Returns the task id.
    pub fn submit_task(
        &self,
        payload: serde_json::Value,
        origin: TaskOrigin,
        target_channel_id: Option<String>,
    ) -> Result<String> {
        Ok(self
            .submit_task_tracked(payload, origin, target_channel_id)?
            .task_id()
            .to_string())
    }

    /// Like [`submit_task`](Self::submit_task), keeping the completion handle.
    pub fn submit_task_tracked(
        &self,
        payload: serde_json::Value,
        origin: TaskOrigin,
        target_channel_id: Option<String>,
    ) -> Result<DispatchHandle> {
        SourcePayload::from_value(&payload)?;
        if let Some(id) = &target_channel_id {
            if self.ledger.get_channel(id)?.is_none() {
                return Err(ForgeError::NotFound(format!("channel {id}")));
            }
        }
        let prefix = match origin {
            TaskOrigin::Manual => "task",
            TaskOrigin::Schedule => "sched",
            TaskOrigin::Radar => "radar",
        };
        let task = Task::new(Task::new_id(prefix), payload, origin, target_channel_id);
        self.enqueue(&task)
    }

    /// Persist `task` as given and dispatch it on its origin's lane.
    ///
    /// If the lane refuses it, the task is marked failed so the recovery
    /// sweep does not pick it up later.
    pub fn enqueue(&self, task: &Task) -> Result<DispatchHandle> {
        self.ledger.upsert_task(task)?;
        tracing::info!("📝 Task {} submitted ({})", task.id, task.origin.as_str());
        match self.dispatcher.dispatch(&task.id, Lane::for_origin(task.origin)) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                let mut refused = task.clone();
                refused.status = TaskStatus::Failed;
                refused.error = Some(e.ledger_message());
                self.ledger.upsert_task(&refused)?;
                Err(e)
            }
        }
    }

    pub fn list_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        self.ledger.list_tasks(limit)
    }

    /// Recent tasks of one origin, e.g. the radar's breakout feed.
    pub fn list_tasks_from(&self, origin: TaskOrigin, limit: usize) -> Result<Vec<Task>> {
        self.ledger.list_tasks_by_origin(origin, limit)
    }

    /// A task plus its status history.
    pub fn task_detail(&self, id: &str) -> Result<(Task, Vec<TaskEvent>)> {
        let task = self
            .ledger
            .get_task(id)?
            .ok_or_else(|| ForgeError::NotFound(format!("task {id}")))?;
        let history = self.ledger.task_history(id)?;
        Ok((task, history))
    }

    /// Insert or replace a schedule entry. New entries start `scheduled`.
    pub fn upsert_schedule(&self, mut entry: ScheduleEntry) -> Result<ScheduleEntry> {
        SourcePayload::from_value(&entry.payload)?;
        if entry.id.trim().is_empty() {
            entry.id = Task::new_id("s");
        }
        // The id ends up in a task id, and task ids name scratch files.
        if !is_safe_id(&entry.id) {
            return Err(ForgeError::Validation(format!(
                "schedule id '{}' may only contain letters, digits, '-' and '_'",
                entry.id
            )));
        }
        if entry.status == ScheduleStatus::Processing {
            return Err(ForgeError::Validation(format!(
                "schedule {} is being processed",
                entry.id
            )));
        }
        self.ledger.upsert_schedule(&entry)?;
        tracing::info!("🗓️ Schedule {} at {}", entry.id, entry.publish_time_local);
        Ok(entry)
    }

    pub fn list_schedules(&self) -> Result<Vec<ScheduleEntry>> {
        self.ledger.list_schedules()
    }

    pub fn delete_schedule(&self, id: &str) -> Result<bool> {
        self.ledger.delete_schedule(id)
    }

    pub fn register_channel(&self, channel: Channel) -> Result<Channel> {
        if channel.id.trim().is_empty() {
            return Err(ForgeError::Validation("channel id is empty".into()));
        }
        self.ledger.upsert_channel(&channel)?;
        tracing::info!("📺 Channel {} registered ({})", channel.id, channel.niche);
        Ok(channel)
    }

    pub fn list_channels(&self) -> Result<Vec<Channel>> {
        self.ledger.list_channels()
    }

    /// Record an externally observed performance sample.
    pub fn record_metric(&self, task_id: &str, ctr: f64, views: u64) -> Result<PerformanceSample> {
        if !(0.0..=1.0).contains(&ctr) {
            return Err(ForgeError::Validation(format!("ctr {ctr} outside 0..=1")));
        }
        if self.ledger.get_task(task_id)?.is_none() {
            return Err(ForgeError::NotFound(format!("task {task_id}")));
        }
        let sample = PerformanceSample {
            task_id: task_id.to_string(),
            ctr,
            views,
            at: Utc::now(),
        };
        self.ledger.record_metric(&sample)?;
        Ok(sample)
    }
}

fn is_safe_id(id: &str) -> bool {
    id.len() <= 128 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
