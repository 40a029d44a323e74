//! Per-task state machine: scrape → mutate → synthesize → publish.
//!
//! Every stage boundary is a durable ledger write. A run always enters at
//! `scraping`, whether the task is fresh or recovered after a crash, and
//! ends in exactly one terminal write. Failed runs delete their scratch
//! artifacts before the terminal write.

use async_trait::async_trait;
use chrono::Utc;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::{Ledger, MutationModel};
use reelforge_core::types::{
    Channel, ChannelStatus, ContentSummary, ContentVariant, SourcePayload, Task, TaskStatus, VariantKind,
};
use reelforge_driver::{AutomationDriver, PublishMetadata};
use reelforge_synthesis::{ArtifactPaths, SynthesisService};
use std::path::PathBuf;
use std::sync::Arc;

use crate::dispatcher::{TaskOutcome, TaskRunner};
use crate::gate::{MutationPlan, QualityGate};
use crate::prompt::mutation_prompt;
use crate::rate_limit::RateLimiter;

/// Everything the orchestrator talks to.
pub struct Orchestrator {
    ledger: Arc<dyn Ledger>,
    driver: Arc<AutomationDriver>,
    model: Arc<dyn MutationModel>,
    gate: QualityGate,
    synthesis: Arc<SynthesisService>,
    rate_limiter: Arc<RateLimiter>,
    base_media: PathBuf,
}

/// What a successful run produced.
struct Published {
    plan: MutationPlan,
    title: String,
    url: String,
    channel_id: String,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        driver: Arc<AutomationDriver>,
        model: Arc<dyn MutationModel>,
        gate: QualityGate,
        synthesis: Arc<SynthesisService>,
        rate_limiter: Arc<RateLimiter>,
        base_media: PathBuf,
    ) -> Self {
        Self {
            ledger,
            driver,
            model,
            gate,
            synthesis,
            rate_limiter,
            base_media,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn driver(&self) -> &Arc<AutomationDriver> {
        &self.driver
    }

    /// Run (or re-run) the pipeline for `task_id`.
    ///
    /// A task already terminal is returned as-is, so re-dispatching an id
    /// never produces a second terminal row.
    pub async fn execute(&self, task_id: &str) -> Result<TaskOutcome> {
        let mut task = self
            .ledger
            .get_task(task_id)?
            .ok_or_else(|| ForgeError::NotFound(format!("task {task_id}")))?;

        if task.status.is_terminal() {
            tracing::debug!("⏭️ Task {task_id} already {}", task.status);
            return Ok(self.outcome_of(&task));
        }

        task.attempt += 1;
        task.error = None;
        self.restart(&mut task)?;
        if task.attempt > 1 {
            tracing::info!("♻️ Task {task_id} resumed at scraping (attempt {})", task.attempt);
        }

        let paths = ArtifactPaths::for_task(self.synthesis.scratch_dir(), &task.id);
        match self.run_stages(&mut task).await {
            Ok(published) => {
                self.record_published(&task, &published);
                paths.remove().await;
                task.status = TaskStatus::Completed;
                self.ledger.upsert_task(&task)?;
                tracing::info!("✅ Task {} completed: {}", task.id, published.url);
                Ok(TaskOutcome {
                    task_id: task.id,
                    status: TaskStatus::Completed,
                    error: None,
                    published_url: Some(published.url),
                })
            }
            Err(e) => {
                let removed = paths.remove().await;
                if removed > 0 {
                    tracing::debug!("🧹 Removed {removed} artifact(s) of {}", task.id);
                }
                let message = e.ledger_message();
                task.status = TaskStatus::Failed;
                task.error = Some(message.clone());
                self.ledger.upsert_task(&task)?;
                tracing::warn!("❌ Task {} failed: {message}", task.id);
                Ok(TaskOutcome::failed(&task.id, message))
            }
        }
    }

    async fn run_stages(&self, task: &mut Task) -> Result<Published> {
        let source = SourcePayload::from_value(&task.payload)?;
        let channel = self.resolve_channel(task)?;
        // The channel's slot is reserved before the browser is touched. Runs
        // that fail before the publish click hand it back.
        let channel_id = channel.id.clone();
        self.rate_limiter.acquire(&channel_id, &task.id, Utc::now())?;
        let result = self.publish_stages(task, &source, channel).await;
        if result.is_err() {
            self.rate_limiter.release(&channel_id, &task.id);
        }
        result
    }

    async fn publish_stages(&self, task: &mut Task, source: &SourcePayload, channel: Channel) -> Result<Published> {
        // 1. Scrape
        let scraped = self.driver.scrape(&source.source_url).await?;
        let source_title = if source.title.trim().is_empty() {
            scraped.title.clone()
        } else {
            source.title.clone()
        };

        // 2. Mutate
        self.transition(task, TaskStatus::Mutating)?;
        let raw = self
            .model
            .generate(&mutation_prompt(&source_title, &scraped.transcript))
            .await?;
        let plan = self.gate.validate(&raw)?;

        // 3. Synthesize
        self.transition(task, TaskStatus::Muxing)?;
        let artifact = self
            .synthesis
            .synthesize(&plan.full_script, &self.base_media, &task.id)
            .await?;

        // 4. Upload
        self.transition(task, TaskStatus::Uploading)?;
        let title = plan
            .ab_titles
            .first()
            .cloned()
            .unwrap_or_else(|| source_title.clone());
        let metadata = PublishMetadata {
            task_id: task.id.clone(),
            title: title.clone(),
            description: format!("#Shorts #AI\n\n{}", plan.emotion_core),
        };
        let url = self.driver.publish(&channel, &artifact, &metadata).await?;

        Ok(Published {
            plan,
            title,
            url,
            channel_id: channel.id,
        })
    }

    /// The task's channel, or the first active channel when it has none.
    /// The chosen channel is pinned on the task.
    fn resolve_channel(&self, task: &mut Task) -> Result<Channel> {
        let channel = match &task.target_channel_id {
            Some(id) => self
                .ledger
                .get_channel(id)?
                .ok_or_else(|| ForgeError::Validation(format!("unknown channel '{id}'")))?,
            None => self
                .ledger
                .list_channels()?
                .into_iter()
                .find(|c| c.status == ChannelStatus::Active)
                .ok_or_else(|| ForgeError::Validation("no active channel to publish to".into()))?,
        };
        if channel.status != ChannelStatus::Active {
            return Err(ForgeError::Validation(format!("channel '{}' is paused", channel.id)));
        }
        task.target_channel_id = Some(channel.id.clone());
        Ok(channel)
    }

    /// Move `task` forward. Backward or sideways moves are refused.
    fn transition(&self, task: &mut Task, next: TaskStatus) -> Result<()> {
        check_transition(task, next)?;
        task.status = next;
        self.ledger.upsert_task(task)?;
        tracing::info!("📌 Task {} → {next}", task.id);
        Ok(())
    }

    /// Every run enters at `scraping`. This is the only move allowed to go
    /// backwards: a recovered task left at a later stage restarts from the top.
    fn restart(&self, task: &mut Task) -> Result<()> {
        task.status = TaskStatus::Scraping;
        self.ledger.upsert_task(task)?;
        tracing::info!("📌 Task {} → {}", task.id, TaskStatus::Scraping);
        Ok(())
    }

    /// Content summary and title variants. The upload already happened, so
    /// a failure here is logged rather than failing the task.
    fn record_published(&self, task: &Task, published: &Published) {
        let now = Utc::now();
        let summary = ContentSummary {
            task_id: task.id.clone(),
            channel_id: Some(published.channel_id.clone()),
            title: published.title.clone(),
            script: published.plan.full_script.clone(),
            published_url: published.url.clone(),
            published_at: now,
        };
        if let Err(e) = self.ledger.record_content(&summary) {
            tracing::warn!("⚠️ Could not record content for {}: {e}", task.id);
        }

        let mut variants = Vec::new();
        for (i, title) in published.plan.ab_titles.iter().enumerate() {
            variants.push(ContentVariant {
                id: format!("{}_title_{i}", task.id),
                parent_task_id: task.id.clone(),
                kind: VariantKind::Title,
                content: title.clone(),
                is_active: i == 0,
                observed_performance: 0.0,
                swapped_at: if i == 0 { Some(now) } else { None },
            });
        }
        for (i, prompt) in published.plan.thumbnail_prompts.iter().enumerate() {
            variants.push(ContentVariant {
                id: format!("{}_thumb_{i}", task.id),
                parent_task_id: task.id.clone(),
                kind: VariantKind::ThumbnailPrompt,
                content: prompt.clone(),
                is_active: false,
                observed_performance: 0.0,
                swapped_at: None,
            });
        }
        if let Err(e) = self.ledger.insert_variants(&variants) {
            tracing::warn!("⚠️ Could not record variants for {}: {e}", task.id);
        }
    }

    fn outcome_of(&self, task: &Task) -> TaskOutcome {
        let published_url = self
            .ledger
            .get_content(&task.id)
            .ok()
            .flatten()
            .map(|c| c.published_url);
        TaskOutcome {
            task_id: task.id.clone(),
            status: task.status,
            error: task.error.clone(),
            published_url,
        }
    }
}

#[async_trait]
impl TaskRunner for Orchestrator {
    async fn run(&self, task_id: &str) -> TaskOutcome {
        match self.execute(task_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Only reachable when the ledger itself is failing.
                tracing::error!("💥 Task {task_id} could not be run: {e}");
                TaskOutcome::failed(task_id, e.ledger_message())
            }
        }
    }
}

fn check_transition(task: &Task, next: TaskStatus) -> Result<()> {
    if task.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(ForgeError::Dispatch(format!(
            "task {}: illegal transition {} → {next}",
            task.id, task.status
        )))
    }
}
