//! The self-healing automation driver.
//!
//! Every interaction runs against a snapshot of the live locator table. A
//! transient failure triggers a heal cycle (patch cache, then the remote
//! registry, evaluated in the sandbox) and the interaction is retried,
//! up to `heal_retries` times. A heal that fails for any reason leaves the
//! live table as it was, and the retry runs against it.

use chrono::Utc;
use reelforge_core::config::DriverConfig;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::{BrowserLauncher, BrowserSession, Ledger, PatchCandidate, PatchRegistry};
use reelforge_core::types::Channel;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::locator::{self, LocatorTable, SharedLocatorTable};
use crate::policy::PatchPolicy;
use crate::sandbox::PatchSandbox;

/// Number of "next" clicks between the details page and the publish page.
const NEXT_CLICKS: usize = 3;

/// Which interaction a heal cycle is repairing. Selects the registry signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Scrape,
    Publish,
    UpdateMetadata,
}

impl Interaction {
    pub fn signals(&self) -> Vec<String> {
        let s: &[&str] = match self {
            Interaction::Scrape => &["youtube", "scraper", "transcript"],
            Interaction::Publish | Interaction::UpdateMetadata => &["youtube", "studio", "selector"],
        };
        s.iter().map(|s| s.to_string()).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interaction::Scrape => "scrape",
            Interaction::Publish => "publish",
            Interaction::UpdateMetadata => "update_metadata",
        }
    }
}

/// What the scrape stage extracts from a source page.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedSource {
    pub title: String,
    pub transcript: String,
}

/// Metadata typed into the upload form.
#[derive(Debug, Clone)]
pub struct PublishMetadata {
    pub task_id: String,
    pub title: String,
    pub description: String,
}

impl PublishMetadata {
    /// Tag that marks an upload as belonging to a task id.
    pub fn marker(task_id: &str) -> String {
        format!("[rf:{task_id}]")
    }

    /// Description with the task marker appended, so a duplicate publish
    /// after crash recovery is recognizable on the platform.
    pub fn description_with_marker(&self) -> String {
        let marker = Self::marker(&self.task_id);
        if self.description.contains(&marker) {
            self.description.clone()
        } else if self.description.is_empty() {
            marker
        } else {
            format!("{}\n\n{}", self.description, marker)
        }
    }
}

pub struct AutomationDriver {
    launcher: Arc<dyn BrowserLauncher>,
    registry: Arc<dyn PatchRegistry>,
    sandbox: Arc<dyn PatchSandbox>,
    ledger: Arc<dyn Ledger>,
    table: SharedLocatorTable,
    policy: PatchPolicy,
    heal_retries: u32,
    studio_url: String,
    step_pause: Duration,
}

impl AutomationDriver {
    pub fn new(
        config: &DriverConfig,
        launcher: Arc<dyn BrowserLauncher>,
        registry: Arc<dyn PatchRegistry>,
        sandbox: Arc<dyn PatchSandbox>,
        ledger: Arc<dyn Ledger>,
    ) -> Result<Self> {
        let table = locator::with_overrides(LocatorTable::builtin(), &config.locator_overrides)?;
        Ok(Self {
            launcher,
            registry,
            sandbox,
            ledger,
            table: SharedLocatorTable::new(table),
            policy: PatchPolicy::from_config(config),
            heal_retries: config.heal_retries,
            studio_url: config.studio_url.trim_end_matches('/').to_string(),
            step_pause: Duration::from_millis(config.step_pause_ms),
        })
    }

    /// Snapshot of the live locator table.
    pub fn locators(&self) -> Arc<LocatorTable> {
        self.table.snapshot()
    }

    /// Read the title and transcript of a source page.
    pub async fn scrape(&self, source_url: &str) -> Result<ScrapedSource> {
        self.with_healing(Interaction::Scrape, |table| self.scrape_once(table, source_url))
            .await
    }

    /// Upload `artifact` to `channel` and return the published URL.
    /// Refreshed session material is written back to the channel.
    pub async fn publish(
        &self,
        channel: &Channel,
        artifact: &Path,
        metadata: &PublishMetadata,
    ) -> Result<String> {
        let url = self
            .with_healing(Interaction::Publish, |table| {
                self.publish_once(table, channel, artifact, metadata)
            })
            .await?;
        tracing::info!("📤 Published {} to '{}': {}", metadata.task_id, channel.id, url);
        Ok(url)
    }

    /// Replace the title of already published content.
    pub async fn update_metadata(&self, channel: &Channel, published_url: &str, title: &str) -> Result<()> {
        self.with_healing(Interaction::UpdateMetadata, |table| {
            self.update_once(table, channel, published_url, title)
        })
        .await
    }

    // ─── Self-heal loop ─────────────────────────────────────

    async fn with_healing<T, F, Fut>(&self, interaction: Interaction, mut attempt: F) -> Result<T>
    where
        F: FnMut(Arc<LocatorTable>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total = 1 + self.heal_retries;
        let mut n = 1;
        loop {
            match attempt(self.table.snapshot()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && n < total => {
                    tracing::warn!(
                        "🩹 {} attempt {}/{} failed: {e}. Healing...",
                        interaction.as_str(),
                        n,
                        total
                    );
                    if !self.heal(interaction, &e.to_string()).await {
                        tracing::warn!("🩹 Heal failed, retrying with the current locator table");
                    }
                    n += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One heal cycle. `true` when a new table went live.
    /// Never returns an error: every fault is a failed heal attempt.
    pub async fn heal(&self, interaction: Interaction, error_text: &str) -> bool {
        let signals = interaction.signals();
        let query = signals.join(",");

        match self.ledger.cached_patch(&query) {
            Ok(Some(cached)) => {
                let candidate = PatchCandidate {
                    asset_id: cached.asset_id,
                    code: cached.solution,
                };
                match self.apply(&candidate).await {
                    Ok(()) => {
                        tracing::info!("🩹 Healed from cached patch {}", candidate.asset_id);
                        return true;
                    }
                    Err(e) => tracing::debug!("cached patch {} not usable: {e}", candidate.asset_id),
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("⚠️ Patch cache unavailable: {e}"),
        }

        let candidate = match self.registry.search(&signals, error_text).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!("🩹 Registry has no patch for [{query}]");
                return false;
            }
            Err(e) => {
                tracing::warn!("🩹 Registry search failed: {e}");
                return false;
            }
        };

        match self.apply(&candidate).await {
            Ok(()) => {
                tracing::info!("🩹 Locator table healed by patch {}", candidate.asset_id);
                if let Err(e) = self.ledger.record_patch(&candidate.asset_id, &query, &candidate.code) {
                    tracing::warn!("⚠️ Could not cache patch {}: {e}", candidate.asset_id);
                }
                true
            }
            Err(e) => {
                tracing::warn!("🩹 Patch {} rejected: {e}", candidate.asset_id);
                false
            }
        }
    }

    /// Admit, evaluate, shape-check and install a patch.
    async fn apply(&self, candidate: &PatchCandidate) -> Result<()> {
        self.policy.admit(&candidate.asset_id, &candidate.code)?;
        let doc = self.sandbox.evaluate(&candidate.code).await?;
        let patch = LocatorTable::from_json(&doc)?;
        self.table.update(|current| {
            let next = current.merged(&patch);
            if next == *current {
                return Err(ForgeError::Sandbox("patch changes nothing".into()));
            }
            Ok(next)
        })
    }

    // ─── Single attempts ────────────────────────────────────

    async fn scrape_once(&self, table: Arc<LocatorTable>, source_url: &str) -> Result<ScrapedSource> {
        let session = self.launcher.launch(None).await?;
        let result = scrape_page(session.as_ref(), &table, source_url).await;
        close_quietly(session.as_ref()).await;
        result
    }

    async fn publish_once(
        &self,
        table: Arc<LocatorTable>,
        channel: &Channel,
        artifact: &Path,
        metadata: &PublishMetadata,
    ) -> Result<String> {
        let session = self.launcher.launch(channel.credential_blob.as_deref()).await?;
        let result = match self.submit_upload(session.as_ref(), &table, artifact, metadata).await {
            Ok(()) => Ok(self.published_url(session.as_ref(), &table, metadata).await),
            Err(e) => Err(e),
        };
        if result.is_ok() {
            self.write_back_credentials(session.as_ref(), channel).await;
        }
        close_quietly(session.as_ref()).await;
        result
    }

    /// Everything up to and including the publish click. Safe to retry: a
    /// failure here means nothing was published.
    async fn submit_upload(
        &self,
        session: &dyn BrowserSession,
        table: &LocatorTable,
        artifact: &Path,
        metadata: &PublishMetadata,
    ) -> Result<()> {
        session.goto(&self.studio_url).await?;

        let create = table.require(session, locator::CREATE_BUTTON).await?;
        session.click(&create).await?;
        let upload = table.require(session, locator::UPLOAD_OPTION).await?;
        session.click(&upload).await?;

        let input = table.require(session, locator::FILE_INPUT).await?;
        session.upload_file(&input, artifact).await?;

        let title = table.require(session, locator::TITLE_INPUT).await?;
        session.type_text(&title, &metadata.title).await?;
        if let Some(description) = table.locate(session, locator::DESCRIPTION_INPUT).await? {
            session
                .type_text(&description, &metadata.description_with_marker())
                .await?;
        }

        for _ in 0..NEXT_CLICKS {
            let next = table.require(session, locator::NEXT_BUTTON).await?;
            session.click(&next).await?;
            self.pause().await;
        }
        let publish = table.require(session, locator::PUBLISH_BUTTON).await?;
        session.click(&publish).await
    }

    /// URL of the upload that was just committed. Infallible: past the
    /// publish click a retry would upload a second copy. Falls back to the
    /// page URL, then to the task marker.
    async fn published_url(
        &self,
        session: &dyn BrowserSession,
        table: &LocatorTable,
        metadata: &PublishMetadata,
    ) -> String {
        match read_video_link(session, table).await {
            Ok(Some(url)) => return url,
            Ok(None) => {}
            Err(e) => tracing::warn!("⚠️ Could not read the video link of {}: {e}", metadata.task_id),
        }
        match session.current_url().await {
            Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
            Ok(_) => PublishMetadata::marker(&metadata.task_id),
            Err(e) => {
                tracing::warn!("⚠️ No URL for published {}: {e}", metadata.task_id);
                PublishMetadata::marker(&metadata.task_id)
            }
        }
    }

    async fn update_once(
        &self,
        table: Arc<LocatorTable>,
        channel: &Channel,
        published_url: &str,
        title: &str,
    ) -> Result<()> {
        let session = self.launcher.launch(channel.credential_blob.as_deref()).await?;
        let result = async {
            session.goto(&edit_url(&self.studio_url, published_url)).await?;
            let input = table.require(session.as_ref(), locator::TITLE_INPUT).await?;
            session.type_text(&input, title).await?;
            let save = table.require(session.as_ref(), locator::SAVE_BUTTON).await?;
            session.click(&save).await
        }
        .await;
        if result.is_ok() {
            self.write_back_credentials(session.as_ref(), channel).await;
        }
        close_quietly(session.as_ref()).await;
        result
    }

    async fn write_back_credentials(&self, session: &dyn BrowserSession, channel: &Channel) {
        let exported = match session.export_credentials().await {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!("⚠️ Could not export session for '{}': {e}", channel.id);
                None
            }
        };
        let Some(blob) = exported.or_else(|| channel.credential_blob.clone()) else {
            return;
        };
        if let Err(e) = self.ledger.refresh_credentials(&channel.id, &blob, Utc::now()) {
            tracing::warn!("⚠️ Could not store session for '{}': {e}", channel.id);
        }
    }

    async fn pause(&self) {
        if !self.step_pause.is_zero() {
            tokio::time::sleep(self.step_pause).await;
        }
    }
}

async fn scrape_page(session: &dyn BrowserSession, table: &LocatorTable, source_url: &str) -> Result<ScrapedSource> {
    session.goto(source_url).await?;

    let title = match table.locate(session, locator::SOURCE_TITLE).await? {
        Some(el) => session.text(&el).await?.trim().to_string(),
        None => String::new(),
    };
    if let Some(opener) = table.locate(session, locator::TRANSCRIPT_OPENER).await? {
        session.click(&opener).await?;
    }
    let mut transcript = match table.locate(session, locator::TRANSCRIPT).await? {
        Some(el) => session.text(&el).await?,
        None => String::new(),
    };
    if transcript.trim().is_empty() {
        if let Some(el) = table.locate(session, locator::SOURCE_DESCRIPTION).await? {
            transcript = session.text(&el).await?;
        }
    }
    if transcript.trim().is_empty() {
        return Err(ForgeError::TransientAutomation(format!(
            "no transcript found at {source_url}"
        )));
    }
    Ok(ScrapedSource {
        title,
        transcript: transcript.trim().to_string(),
    })
}

async fn read_video_link(session: &dyn BrowserSession, table: &LocatorTable) -> Result<Option<String>> {
    let Some(link) = table.locate(session, locator::VIDEO_LINK).await? else {
        return Ok(None);
    };
    let url = session.text(&link).await?;
    let url = url.trim();
    Ok((!url.is_empty()).then(|| url.to_string()))
}

async fn close_quietly(session: &dyn BrowserSession) {
    if let Err(e) = session.close().await {
        tracing::debug!("session close failed: {e}");
    }
}

/// Studio edit page for a published video URL. Unknown shapes are used as-is.
pub fn edit_url(studio_url: &str, published_url: &str) -> String {
    let video_id = url::Url::parse(published_url).ok().and_then(|u| {
        if let Some((_, v)) = u.query_pairs().find(|(k, _)| k == "v") {
            return Some(v.to_string());
        }
        let segments: Vec<String> = u.path_segments()?.map(str::to_string).collect();
        match (u.host_str(), segments.as_slice()) {
            (Some("youtu.be"), [id, ..]) => Some(id.clone()),
            (_, [first, id, ..]) if first == "video" || first == "shorts" => Some(id.clone()),
            _ => None,
        }
    });
    match video_id {
        Some(id) if !id.is_empty() => format!("{studio_url}/video/{id}/edit"),
        _ => published_url.to_string(),
    }
}
