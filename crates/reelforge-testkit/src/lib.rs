//! # ReelForge Testkit
//!
//! Fakes for the outbound collaborators and a [`TestBed`] that wires the
//! real ledger, driver, synthesis service, orchestrator and dispatcher
//! around them, with an in-memory ledger and a private scratch directory.

pub mod fakes;

use reelforge_core::config::ForgeConfig;
use reelforge_core::error::Result;
use reelforge_core::traits::Ledger;
use reelforge_core::types::{Channel, Task, TaskOrigin, TaskStatus};
use reelforge_driver::{AutomationDriver, sandbox};
use reelforge_ledger::SqliteLedger;
use reelforge_pipeline::{
    ControlPlane, DispatchHandle, Dispatcher, Orchestrator, QualityGate, RateLimiter, TaskOutcome,
};
use reelforge_synthesis::SynthesisService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use fakes::*;

static BED_SEQ: AtomicUsize = AtomicUsize::new(0);

pub struct TestBed {
    pub config: ForgeConfig,
    pub ledger: Arc<SqliteLedger>,
    pub browser: FakeBrowser,
    pub registry: Arc<FakeRegistry>,
    pub model: Arc<FakeModel>,
    pub speech: Arc<FakeSpeech>,
    pub transcoder: Arc<FakeTranscoder>,
    pub driver: Arc<AutomationDriver>,
    pub orchestrator: Arc<Orchestrator>,
    pub control: ControlPlane,
    root: PathBuf,
}

impl TestBed {
    pub fn new() -> Self {
        Self::with_config(Self::base_config())
    }

    /// Defaults with no pauses between clicks.
    pub fn base_config() -> ForgeConfig {
        let mut config = ForgeConfig::default();
        config.driver.step_pause_ms = 0;
        config.driver.sandbox = "declarative".into();
        config
    }

    pub fn with_config(mut config: ForgeConfig) -> Self {
        let root = std::env::temp_dir().join(format!(
            "reelforge-bed-{}-{}",
            std::process::id(),
            BED_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        let scratch = root.join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        let base_media = root.join("base_footage.mp4");
        std::fs::write(&base_media, b"base footage").unwrap();
        config.scratch.dir = scratch.to_string_lossy().to_string();
        config.scratch.base_media = base_media.to_string_lossy().to_string();

        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let shared: Arc<dyn Ledger> = ledger.clone();
        let browser = FakeBrowser::new();
        let registry = Arc::new(FakeRegistry::default());
        let model = Arc::new(FakeModel::new(valid_plan()));
        let speech = Arc::new(FakeSpeech::default());
        let transcoder = Arc::new(FakeTranscoder::default());

        let patch_sandbox = sandbox::from_config(&config.driver, &root.join("sandbox")).unwrap();
        let driver = Arc::new(
            AutomationDriver::new(
                &config.driver,
                Arc::new(browser.clone()),
                registry.clone(),
                patch_sandbox,
                shared.clone(),
            )
            .unwrap(),
        );
        let synthesis = Arc::new(SynthesisService::new(speech.clone(), transcoder.clone(), scratch));
        let rate_limiter = Arc::new(RateLimiter::new(shared.clone(), &config.rate_limit));
        let orchestrator = Arc::new(Orchestrator::new(
            shared.clone(),
            driver.clone(),
            model.clone(),
            QualityGate::new(config.quality_gate.clone()),
            synthesis,
            rate_limiter,
            base_media,
        ));
        let dispatcher = Dispatcher::new(orchestrator.clone(), &config.dispatcher);
        let control = ControlPlane::new(shared, dispatcher);

        Self {
            config,
            ledger,
            browser,
            registry,
            model,
            speech,
            transcoder,
            driver,
            orchestrator,
            control,
            root,
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.scratch.dir)
    }

    /// File names currently in scratch storage.
    pub fn scratch_files(&self) -> Vec<String> {
        list_dir(&self.scratch_dir())
    }

    /// Register an active channel with stored session material.
    pub fn channel(&self, id: &str) -> Channel {
        let mut channel = Channel::new(id, &format!("Channel {id}"), "food");
        channel.credential_blob = Some(r#"[{"name":"SID","value":"initial"}]"#.into());
        self.ledger.upsert_channel(&channel).unwrap();
        channel
    }

    /// Persist a manual task with a fixed id, without dispatching it.
    pub fn put_task(&self, id: &str, channel_id: &str) -> Task {
        let task = Task::new(
            id,
            serde_json::json!({"source_url": format!("https://www.youtube.com/watch?v={id}"), "title": ""}),
            TaskOrigin::Manual,
            Some(channel_id.to_string()),
        );
        self.ledger.upsert_task(&task).unwrap();
        task
    }

    /// Submit through the control plane and keep the completion handle.
    pub fn submit(&self, channel_id: &str) -> Result<DispatchHandle> {
        self.control.submit_task_tracked(
            serde_json::json!({"source_url": "https://www.youtube.com/watch?v=host1", "title": "Host"}),
            TaskOrigin::Manual,
            Some(channel_id.to_string()),
        )
    }

    /// Submit and wait for the terminal outcome.
    pub async fn run_to_end(&self, channel_id: &str) -> TaskOutcome {
        self.submit(channel_id).unwrap().outcome().await.unwrap()
    }

    /// Recorded statuses with repeats collapsed. Queueing and the first
    /// attempt both write `Scraping`.
    pub fn statuses(&self, task_id: &str) -> Vec<TaskStatus> {
        let mut statuses: Vec<TaskStatus> = self
            .ledger
            .task_history(task_id)
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        statuses.dedup();
        statuses
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestBed {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
