//! Bounded, lane-based task dispatcher.
//!
//! Heartbeats and the control plane enqueue task ids; a global worker
//! ceiling plus per-lane concurrency limits decide what runs. Callers
//! observe completion through a [`DispatchHandle`] instead of a dangling
//! spawned future.

use async_trait::async_trait;
use reelforge_core::config::DispatcherConfig;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::types::{TaskOrigin, TaskStatus};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, oneshot};

/// Scheduling lane. Determines dispatch priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Operator submissions. Highest priority.
    Manual,
    /// Promoted schedule entries.
    Scheduled,
    /// Re-dispatch of interrupted tasks.
    Recovery,
    /// Discovered candidates. Lowest priority.
    Radar,
}

impl Lane {
    pub const ALL: [Lane; 4] = [Lane::Manual, Lane::Scheduled, Lane::Recovery, Lane::Radar];

    /// Priority order (lower = higher priority).
    pub fn priority(&self) -> usize {
        match self {
            Lane::Manual => 0,
            Lane::Scheduled => 1,
            Lane::Recovery => 2,
            Lane::Radar => 3,
        }
    }

    /// Max concurrent pipelines per lane.
    pub fn max_concurrent(&self) -> usize {
        match self {
            Lane::Manual => 4,
            Lane::Scheduled => 2,
            Lane::Recovery => 2,
            Lane::Radar => 1,
        }
    }

    pub fn for_origin(origin: TaskOrigin) -> Self {
        match origin {
            TaskOrigin::Manual => Lane::Manual,
            TaskOrigin::Schedule => Lane::Scheduled,
            TaskOrigin::Radar => Lane::Radar,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Manual => write!(f, "manual"),
            Lane::Scheduled => write!(f, "scheduled"),
            Lane::Recovery => write!(f, "recovery"),
            Lane::Radar => write!(f, "radar"),
        }
    }
}

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub published_url: Option<String>,
}

impl TaskOutcome {
    pub fn failed(task_id: &str, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            error: Some(error.into()),
            published_url: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Whatever actually executes a task id.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task_id: &str) -> TaskOutcome;
}

/// Completion of one dispatched task.
pub struct DispatchHandle {
    task_id: String,
    rx: oneshot::Receiver<TaskOutcome>,
}

impl DispatchHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Wait for the terminal outcome.
    pub async fn outcome(self) -> Result<TaskOutcome> {
        self.rx
            .await
            .map_err(|_| ForgeError::Dispatch(format!("dispatcher dropped task {}", self.task_id)))
    }
}

struct LaneState {
    queue: VecDeque<String>,
    active: usize,
    max_concurrent: usize,
    total_processed: u64,
}

impl LaneState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            active: 0,
            max_concurrent,
            total_processed: 0,
        }
    }

    fn can_run(&self) -> bool {
        self.active < self.max_concurrent && !self.queue.is_empty()
    }

    fn complete(&mut self) {
        self.active = self.active.saturating_sub(1);
        self.total_processed += 1;
    }
}

struct State {
    lanes: [LaneState; 4],
    /// Task ids queued or running, with everyone waiting on them.
    waiters: HashMap<String, Vec<oneshot::Sender<TaskOutcome>>>,
}

struct Inner {
    runner: Arc<dyn TaskRunner>,
    workers: Arc<Semaphore>,
    queue_depth: usize,
    state: Mutex<State>,
}

/// Statistics for a single lane.
#[derive(Debug, Clone, Serialize)]
pub struct LaneStats {
    pub lane: Lane,
    pub queued: usize,
    pub active: usize,
    pub max_concurrent: usize,
    pub total_processed: u64,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn TaskRunner>, config: &DispatcherConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            inner: Arc::new(Inner {
                runner,
                workers: Arc::new(Semaphore::new(workers)),
                queue_depth: config.queue_depth.max(1),
                state: Mutex::new(State {
                    lanes: Lane::ALL.map(|l| LaneState::new(l.max_concurrent())),
                    waiters: HashMap::new(),
                }),
            }),
        }
    }

    /// Enqueue `task_id` on `lane`.
    ///
    /// A task id that is already queued or running is not enqueued again;
    /// the returned handle resolves with that run's outcome. A full lane is
    /// refused with [`ForgeError::Dispatch`].
    pub fn dispatch(&self, task_id: &str, lane: Lane) -> Result<DispatchHandle> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.lock()?;
            if let Some(waiters) = state.waiters.get_mut(task_id) {
                tracing::debug!("📥 {task_id} already in flight; attaching");
                waiters.push(tx);
                return Ok(DispatchHandle {
                    task_id: task_id.to_string(),
                    rx,
                });
            }
            let lane_state = &mut state.lanes[lane.priority()];
            if lane_state.queue.len() >= self.inner.queue_depth {
                return Err(ForgeError::Dispatch(format!(
                    "lane {lane} is full ({} queued)",
                    lane_state.queue.len()
                )));
            }
            lane_state.queue.push_back(task_id.to_string());
            tracing::debug!(
                "📥 Lane[{lane}] enqueue: {task_id} (queue: {}, active: {})",
                lane_state.queue.len(),
                lane_state.active
            );
            state.waiters.insert(task_id.to_string(), vec![tx]);
        }
        Inner::pump(&self.inner);
        Ok(DispatchHandle {
            task_id: task_id.to_string(),
            rx,
        })
    }

    /// Whether `task_id` is queued or running.
    pub fn in_flight(&self, task_id: &str) -> bool {
        self.inner
            .lock()
            .map(|s| s.waiters.contains_key(task_id))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> Vec<LaneStats> {
        let Ok(state) = self.inner.lock() else {
            return Vec::new();
        };
        Lane::ALL
            .iter()
            .map(|lane| {
                let s = &state.lanes[lane.priority()];
                LaneStats {
                    lane: *lane,
                    queued: s.queue.len(),
                    active: s.active,
                    max_concurrent: s.max_concurrent,
                    total_processed: s.total_processed,
                }
            })
            .collect()
    }

    /// Queued plus running tasks across all lanes.
    pub fn total_pending(&self) -> usize {
        self.stats().iter().map(|s| s.queued + s.active).sum()
    }
}

impl Inner {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| ForgeError::Dispatch("dispatcher state poisoned".into()))
    }

    /// Start as many queued tasks as the lane limits and free workers allow,
    /// highest-priority lane first.
    fn pump(this: &Arc<Inner>) {
        loop {
            let Ok(permit) = this.workers.clone().try_acquire_owned() else {
                return;
            };
            let next = {
                let Ok(mut state) = this.lock() else {
                    return;
                };
                Lane::ALL.iter().find_map(|lane| {
                    let s = &mut state.lanes[lane.priority()];
                    if s.can_run() {
                        s.active += 1;
                        s.queue.pop_front().map(|id| (*lane, id))
                    } else {
                        None
                    }
                })
            };
            let Some((lane, task_id)) = next else {
                return;
            };

            let inner = this.clone();
            tokio::spawn(async move {
                let runner = inner.runner.clone();
                let id = task_id.clone();
                // A panicking runner must still release its slot and answer waiters.
                let outcome = match tokio::spawn(async move { runner.run(&id).await }).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!("💥 Pipeline for {task_id} aborted: {e}");
                        TaskOutcome::failed(&task_id, format!("pipeline aborted: {e}"))
                    }
                };
                drop(permit);

                let waiters = match inner.lock() {
                    Ok(mut state) => {
                        state.lanes[lane.priority()].complete();
                        state.waiters.remove(&task_id).unwrap_or_default()
                    }
                    Err(_) => Vec::new(),
                };
                for tx in waiters {
                    let _ = tx.send(outcome.clone());
                }
                Inner::pump(&inner);
            });
        }
    }
}
