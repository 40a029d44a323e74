//! Fakes for every outbound collaborator. Each records what it was asked.

use async_trait::async_trait;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::{
    BrowserLauncher, BrowserSession, Candidate, ElementHandle, ElementQuery, MetricsSource, MutationModel,
    PatchCandidate, PatchRegistry, SignalSource, SpeechEngine, Transcoder,
};
use reelforge_driver::LocatorTable;
use reelforge_driver::locator;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SOURCE_TITLE: &str = "How baristas really make cold brew";
pub const PUBLISHED_URL: &str = "https://youtube.com/shorts/rf0001";
pub const STUDIO_PAGE_URL: &str = "https://studio.youtube.com/channel/UC/videos";
pub const EXPORTED_COOKIES: &str = r#"[{"name":"SID","value":"refreshed"}]"#;

fn transcript() -> String {
    "Cold brew is not iced coffee. You steep coarse grounds for eighteen hours, ".repeat(6)
}

/// Query values of every built-in locator for `role`.
pub fn builtin_queries(role: &str) -> Vec<String> {
    LocatorTable::builtin()
        .get(role)
        .iter()
        .map(|l| l.to_query().value)
        .collect()
}

#[derive(Default)]
struct BrowserState {
    missing: HashSet<String>,
    stale_once: HashSet<String>,
    texts: HashMap<String, String>,
    calls: Vec<String>,
    credentials_seen: Vec<Option<String>>,
}

/// Scriptable browser. Every query finds an element (whose handle is the
/// query text) unless the query was marked missing.
#[derive(Clone)]
pub struct FakeBrowser {
    state: Arc<Mutex<BrowserState>>,
    launches: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        let browser = Self {
            state: Arc::new(Mutex::new(BrowserState::default())),
            launches: Arc::new(AtomicUsize::new(0)),
        };
        browser.set_role_text(locator::SOURCE_TITLE, SOURCE_TITLE);
        browser.set_role_text(locator::TRANSCRIPT, &transcript());
        browser.set_role_text(locator::VIDEO_LINK, PUBLISHED_URL);
        browser
    }

    /// Text returned for every built-in locator of `role`.
    pub fn set_role_text(&self, role: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        for q in builtin_queries(role) {
            state.texts.insert(q, text.to_string());
        }
    }

    /// Make every built-in locator of `role` miss, as after a UI change.
    pub fn break_role(&self, role: &str) {
        let mut state = self.state.lock().unwrap();
        state.missing.extend(builtin_queries(role));
    }

    /// The next text read of every built-in locator of `role` fails as a
    /// stale element. Later reads succeed.
    pub fn stale_text_once(&self, role: &str) {
        let mut state = self.state.lock().unwrap();
        state.stale_once.extend(builtin_queries(role));
    }

    /// Clicks whose element matches one of `role`'s built-in locators.
    pub fn clicks_on(&self, role: &str) -> usize {
        let queries = builtin_queries(role);
        self.calls()
            .iter()
            .filter(|c| queries.iter().any(|q| **c == format!("click {q}")))
            .count()
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Session material each launch was given.
    pub fn credentials_seen(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().credentials_seen.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self, credentials: Option<&str>) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .credentials_seen
            .push(credentials.map(str::to_string));
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn goto(&self, url: &str) -> Result<()> {
        self.record(format!("goto {url}"));
        Ok(())
    }

    async fn find(&self, query: &ElementQuery) -> Result<Option<ElementHandle>> {
        let missing = self.state.lock().unwrap().missing.contains(&query.value);
        Ok((!missing).then(|| ElementHandle(query.value.clone())))
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.record(format!("click {}", element.0));
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.record(format!("type {} = {text}", element.0));
        Ok(())
    }

    async fn upload_file(&self, element: &ElementHandle, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ForgeError::TransientAutomation(format!("{} missing", path.display())));
        }
        self.record(format!("upload {} <- {}", element.0, path.display()));
        Ok(())
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.stale_once.remove(&element.0) {
            return Err(ForgeError::TransientAutomation("stale element reference".into()));
        }
        Ok(state.texts.get(&element.0).cloned().unwrap_or_default())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(STUDIO_PAGE_URL.into())
    }

    async fn export_credentials(&self) -> Result<Option<String>> {
        Ok(Some(EXPORTED_COOKIES.to_string()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A plan that passes the default quality gate.
pub fn valid_plan() -> Value {
    json!({
        "emotion_core": "Curiosity gap: the shortcut professionals skip",
        "hook_script": "Stop making cold brew like this.",
        "full_script": "Nobody tells you this about cold brew. Coarse grounds, cold water, eighteen hours. \
                        That's it. The bitterness you hate comes from heat, and cold brew never sees any.",
        "ab_titles": [
            "The cold brew trick baristas hide",
            "Why your iced coffee tastes flat",
            "18 hours to better coffee"
        ],
        "thumbnail_prompts": ["Mason jar of dark coffee on a marble counter"]
    })
}

pub struct FakeModel {
    plan: Mutex<Value>,
    calls: AtomicUsize,
}

impl FakeModel {
    pub fn new(plan: Value) -> Self {
        Self {
            plan: Mutex::new(plan),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_plan(&self, plan: Value) {
        *self.plan.lock().unwrap() = plan;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MutationModel for FakeModel {
    fn name(&self) -> &str {
        "fake-model"
    }

    async fn generate(&self, _prompt: &str) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plan.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeSpeech {
    calls: AtomicUsize,
}

impl FakeSpeech {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechEngine for FakeSpeech {
    async fn speak(&self, _text: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"ID3 narration".to_vec())
    }
}

/// Writes a small output file; can be told to fail after writing it.
#[derive(Default)]
pub struct FakeTranscoder {
    fail: Mutex<bool>,
    calls: AtomicUsize,
}

impl FakeTranscoder {
    pub fn fail_next(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !video.exists() || !audio.exists() {
            return Err(ForgeError::Synthesis("input missing".into()));
        }
        tokio::fs::write(output, b"partial mp4").await?;
        if *self.fail.lock().unwrap() {
            return Err(ForgeError::Synthesis("ffmpeg exited with 1".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    answer: Mutex<Option<PatchCandidate>>,
    searches: AtomicUsize,
}

impl FakeRegistry {
    pub fn answer_with(&self, asset_id: &str, code: &str) {
        *self.answer.lock().unwrap() = Some(PatchCandidate {
            asset_id: asset_id.to_string(),
            code: code.to_string(),
        });
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PatchRegistry for FakeRegistry {
    async fn search(&self, _signals: &[String], _error_text: &str) -> Result<Option<PatchCandidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeSignals {
    pub candidates: Mutex<Vec<Candidate>>,
}

#[async_trait]
impl SignalSource for FakeSignals {
    async fn poll(&self) -> Result<Vec<Candidate>> {
        Ok(self.candidates.lock().unwrap().clone())
    }
}

/// Fixed CTR per task id; unknown ids read as 1.0.
#[derive(Default)]
pub struct FakeMetrics {
    pub ctr: Mutex<HashMap<String, f64>>,
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn performance(&self, task_id: &str) -> Result<f64> {
        Ok(self.ctr.lock().unwrap().get(task_id).copied().unwrap_or(1.0))
    }
}
