//! # ReelForge
//!
//! Scrape → mutate → synthesize → publish, with a durable ledger and a
//! self-healing browser driver.
//!
//! Usage:
//!   reelforge serve                          # Gateway + dispatcher + heartbeats
//!   reelforge submit <url> --channel c1      # Run one task in-process and wait
//!   reelforge tasks [--id <task>]            # Recent tasks, or one task's history
//!   reelforge channels add c1 --cookies f    # Register a channel
//!   reelforge init-config                    # Write ~/.reelforge/config.toml

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reelforge_core::config::{ForgeConfig, expand_path};
use reelforge_core::traits::{Ledger, SignalSource};
use reelforge_core::types::{Channel, ChannelStatus, TaskOrigin};
use reelforge_driver::{AutomationDriver, EvoRegistryClient, WebDriverLauncher, sandbox};
use reelforge_ledger::SqliteLedger;
use reelforge_pipeline::{ControlPlane, Dispatcher, HttpMutationModel, Orchestrator, QualityGate, RateLimiter};
use reelforge_scheduler::{
    FeedSignalSource, Heartbeats, LedgerMetrics, Radar, RecoverySweep, SchedulePromoter, VariantSwapMonitor,
};
use reelforge_synthesis::{FfmpegTranscoder, HttpSpeechEngine, SynthesisService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reelforge", version, about = "🎬 ReelForge — self-healing short-video pipeline")]
struct Cli {
    /// Config file (default: ~/.reelforge/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway, the dispatcher and every heartbeat
    Serve {
        /// Override the gateway port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one task through the pipeline in this process
    Submit {
        source_url: String,
        #[arg(short, long, default_value = "")]
        title: String,
        /// Target channel (default: first active channel)
        #[arg(long)]
        channel: Option<String>,
    },
    /// List recent tasks
    Tasks {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Show one task with its status history
        #[arg(long)]
        id: Option<String>,
    },
    /// List or register channels
    Channels {
        #[command(subcommand)]
        action: Option<ChannelAction>,
    },
    /// List schedule entries
    Schedules,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ChannelAction {
    List,
    Add {
        id: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        niche: String,
        /// File holding exported browser cookies (JSON array)
        #[arg(long)]
        cookies: Option<String>,
        #[arg(long)]
        paused: bool,
    },
}

/// Everything a running pipeline is made of.
struct Service {
    control: ControlPlane,
    driver: Arc<AutomationDriver>,
    scratch_dir: PathBuf,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "reelforge=debug,tower_http=debug"
    } else {
        "reelforge=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(path: Option<&str>) -> Result<ForgeConfig> {
    let config = match path {
        Some(p) => ForgeConfig::load_from(&expand_path(p))?,
        None => ForgeConfig::load()?,
    };
    Ok(config)
}

fn open_ledger(config: &ForgeConfig) -> Result<Arc<SqliteLedger>> {
    let path = expand_path(&config.ledger.db_path);
    let ledger = SqliteLedger::open(&path).with_context(|| format!("opening ledger {}", path.display()))?;
    Ok(Arc::new(ledger))
}

fn build_service(config: &ForgeConfig, ledger: Arc<dyn Ledger>) -> Result<Service> {
    let scratch_dir = expand_path(&config.scratch.dir);
    let base_media = expand_path(&config.scratch.base_media);
    std::fs::create_dir_all(&scratch_dir)?;
    if !base_media.exists() {
        tracing::warn!("⚠️ Base media {} not found; synthesis will fail", base_media.display());
    }

    let patch_sandbox = sandbox::from_config(&config.driver, &ForgeConfig::home_dir().join("sandbox"))?;
    let driver = Arc::new(AutomationDriver::new(
        &config.driver,
        Arc::new(WebDriverLauncher::from_config(&config.driver)),
        Arc::new(EvoRegistryClient::new(&config.driver.patch_registry_url)),
        patch_sandbox,
        ledger.clone(),
    )?);

    let synthesis = Arc::new(SynthesisService::new(
        Arc::new(HttpSpeechEngine::from_config(&config.synthesis)),
        Arc::new(FfmpegTranscoder::from_config(&config.synthesis)),
        scratch_dir.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        ledger.clone(),
        driver.clone(),
        Arc::new(HttpMutationModel::from_config(&config.model)),
        QualityGate::new(config.quality_gate.clone()),
        synthesis,
        Arc::new(RateLimiter::new(ledger.clone(), &config.rate_limit)),
        base_media,
    ));
    let dispatcher = Dispatcher::new(orchestrator, &config.dispatcher);

    Ok(Service {
        control: ControlPlane::new(ledger, dispatcher),
        driver,
        scratch_dir,
    })
}

async fn serve(config: ForgeConfig, port: Option<u16>) -> Result<()> {
    let ledger = open_ledger(&config)?;
    let service = build_service(&config, ledger.clone())?;

    if let Err(e) = reelforge_pipeline::sweep_orphans(ledger.as_ref(), &service.scratch_dir).await {
        tracing::warn!("⚠️ Scratch sweep failed: {e}");
    }

    let control = service.control.clone();
    let radar = if config.radar.enabled && !config.radar.feed_url.is_empty() {
        let source: Arc<dyn SignalSource> = Arc::new(FeedSignalSource::new(&config.radar.feed_url));
        Some(Arc::new(Radar::new(control.clone(), source, config.radar.velocity_threshold)))
    } else {
        None
    };
    let heartbeats = Heartbeats {
        promoter: Arc::new(SchedulePromoter::new(control.clone())),
        radar,
        recovery: Arc::new(RecoverySweep::new(
            control.clone(),
            config.ledger.stale_after_minutes,
            config.ledger.prune_payloads_after_days,
        )),
        variant_swap: Arc::new(VariantSwapMonitor::new(
            ledger.clone(),
            service.driver.clone(),
            Arc::new(LedgerMetrics::new(ledger.clone())),
            config.variant_swap.ctr_threshold,
            config.variant_swap.lookback_hours,
        )),
    };
    let handles = heartbeats.spawn(&config.heartbeats);

    let mut gateway = config.gateway.clone();
    if let Some(port) = port {
        gateway.port = port;
    }
    println!("🎬 ReelForge v{}", env!("CARGO_PKG_VERSION"));
    println!("   🌐 Gateway:    http://{}:{}", gateway.host, gateway.port);
    println!("   🗄️  Ledger:     {}", config.ledger.db_path);
    println!("   📂 Scratch:    {}", service.scratch_dir.display());
    println!("   💓 Heartbeats: {}", handles.len());
    println!();

    let result = reelforge_gateway::start(&gateway, reelforge_gateway::AppState::new(control)).await;
    for handle in handles {
        handle.abort();
    }
    result
}

async fn submit(config: ForgeConfig, source_url: String, title: String, channel: Option<String>) -> Result<()> {
    let ledger = open_ledger(&config)?;
    let service = build_service(&config, ledger)?;
    let handle = service.control.submit_task_tracked(
        serde_json::json!({"source_url": source_url, "title": title}),
        TaskOrigin::Manual,
        channel,
    )?;
    println!("📌 Task {} queued", handle.task_id());
    let outcome = handle.outcome().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.is_success() {
        Ok(())
    } else {
        anyhow::bail!("task {} failed", outcome.task_id)
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    if let Commands::InitConfig { force } = &cli.command {
        let path = cli
            .config
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(ForgeConfig::default_path);
        if path.exists() && !force {
            println!("⚠️  {} already exists (use --force to overwrite)", path.display());
            return Ok(());
        }
        ForgeConfig::default().save_to(&path)?;
        println!("✅ Wrote {}", path.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Submit {
            source_url,
            title,
            channel,
        } => submit(config, source_url, title, channel).await,
        Commands::Tasks { limit, id } => {
            let ledger = open_ledger(&config)?;
            match id {
                Some(id) => {
                    let task = ledger
                        .get_task(&id)?
                        .with_context(|| format!("task {id} not found"))?;
                    print_json(&serde_json::json!({
                        "task": task,
                        "history": ledger.task_history(&id)?,
                    }))
                }
                None => {
                    for task in ledger.list_tasks(limit)? {
                        println!(
                            "{:<28} {:<10} {:<9} {}",
                            task.id,
                            task.status,
                            task.origin.as_str(),
                            task.error.unwrap_or_default()
                        );
                    }
                    Ok(())
                }
            }
        }
        Commands::Channels { action } => {
            let ledger = open_ledger(&config)?;
            match action.unwrap_or(ChannelAction::List) {
                ChannelAction::List => print_json(&ledger.list_channels()?),
                ChannelAction::Add {
                    id,
                    name,
                    niche,
                    cookies,
                    paused,
                } => {
                    let mut channel = Channel::new(&id, &name, &niche);
                    if let Some(path) = cookies {
                        let blob = std::fs::read_to_string(expand_path(&path))
                            .with_context(|| format!("reading cookies from {path}"))?;
                        channel.credential_blob = Some(blob.trim().to_string());
                    }
                    if paused {
                        channel.status = ChannelStatus::Paused;
                    }
                    ledger.upsert_channel(&channel)?;
                    println!("📺 Channel {id} saved");
                    Ok(())
                }
            }
        }
        Commands::Schedules => {
            let ledger = open_ledger(&config)?;
            print_json(&ledger.list_schedules()?)
        }
        Commands::InitConfig { .. } => Ok(()),
    }
}
