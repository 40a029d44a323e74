//! In-crate test doubles for heartbeat tests.

use async_trait::async_trait;
use reelforge_core::config::DispatcherConfig;
use reelforge_core::traits::Ledger;
use reelforge_core::types::TaskStatus;
use reelforge_ledger::SqliteLedger;
use reelforge_pipeline::{ControlPlane, Dispatcher, TaskOutcome, TaskRunner};
use std::sync::{Arc, Mutex};

/// Runner that answers every task the same way and records the ids it ran.
pub struct Scripted {
    error: Option<String>,
    runs: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn succeed() -> Arc<Self> {
        Arc::new(Self {
            error: None,
            runs: Mutex::new(Vec::new()),
        })
    }

    pub fn fail(error: &str) -> Arc<Self> {
        Arc::new(Self {
            error: Some(error.to_string()),
            runs: Mutex::new(Vec::new()),
        })
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskRunner for Scripted {
    async fn run(&self, task_id: &str) -> TaskOutcome {
        self.runs.lock().unwrap().push(task_id.to_string());
        match &self.error {
            Some(e) => TaskOutcome::failed(task_id, e.clone()),
            None => TaskOutcome {
                task_id: task_id.to_string(),
                status: TaskStatus::Completed,
                error: None,
                published_url: Some(format!("https://youtu.be/{task_id}")),
            },
        }
    }
}

pub fn control_plane(runner: Arc<Scripted>) -> (ControlPlane, Arc<Scripted>) {
    control_plane_on(Arc::new(SqliteLedger::open_in_memory().unwrap()), runner)
}

pub fn control_plane_on(ledger: Arc<SqliteLedger>, runner: Arc<Scripted>) -> (ControlPlane, Arc<Scripted>) {
    let ledger: Arc<dyn Ledger> = ledger;
    let dispatcher = Dispatcher::new(runner.clone(), &DispatcherConfig::default());
    (ControlPlane::new(ledger, dispatcher), runner)
}
