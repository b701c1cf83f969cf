//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bulletin_core::{Pipeline, ProgressReporter, RunOutcome, SilentProgress, Stage};
use bulletin_feeds::GoogleNewsFeed;
use bulletin_mailer::SendGridMailer;
use bulletin_openrouter::OpenRouterClient;
use bulletin_shared::{
    AppConfig, RunState, init_config, load_config, load_config_from, validate_completion_key,
    validate_mail_key,
};
use bulletin_storage::{NewRun, RunStatus, Storage};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// bulletin: a council news digest, gathered, summarised and emailed.
#[derive(Parser)]
#[command(
    name = "bulletin",
    version,
    about = "Gather local news, enrich it with AI summaries and email the digest.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.bulletin/bulletin.toml).
    #[arg(long, global = true, env = "BULLETIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build and send the digest if the schedule allows it.
    Run {
        /// Ignore the run frequency and run now.
        #[arg(long)]
        force: bool,
    },

    /// Keep running, checking the schedule at a fixed interval.
    Watch,

    /// Build the digest and write the HTML without sending it.
    Preview {
        /// Output file. Prints to stdout when omitted.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show recently recorded runs.
    History {
        /// Number of runs to show.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "bulletin=info",
        1 => "bulletin=debug",
        _ => "bulletin=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config {
        action: ConfigAction::Init,
    } = cli.command
    {
        return cmd_config_init();
    }

    let config = resolve_config(cli.config.as_deref())?;
    match cli.command {
        Command::Run { force } => cmd_run(&config, force).await,
        Command::Watch => cmd_watch(&config).await,
        Command::Preview { out } => cmd_preview(&config, out.as_deref()).await,
        Command::History { limit } => cmd_history(&config, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if config.categories.is_empty() {
        return Err(eyre!("no [[categories]] configured"));
    }
    Ok(config)
}

type LivePipeline = Pipeline<GoogleNewsFeed, OpenRouterClient, SendGridMailer>;

fn build_pipeline(config: &AppConfig) -> Result<LivePipeline> {
    // Both keys are optional at this point: enrichment degrades without one,
    // dispatch fails without the other.
    if let Err(e) = validate_completion_key(config) {
        warn!("{e}");
    }
    if let Err(e) = validate_mail_key(config) {
        warn!("{e}");
    }

    Ok(Pipeline::new(
        GoogleNewsFeed::from_config(&config.feed)?,
        OpenRouterClient::from_config(&config.openrouter)?,
        SendGridMailer::from_config(&config.mail)?,
        config,
    ))
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = config.storage.resolved_path()?;
    Ok(Storage::open(&path).await?)
}

async fn load_state(config: &AppConfig, storage: &Storage) -> Result<RunState> {
    let last_run = storage.last_successful_run().await?;
    Ok(RunState::new(config.schedule.frequency_hours).with_last_run(last_run))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, force: bool) -> Result<()> {
    let storage = open_storage(config).await?;
    let state = load_state(config, &storage).await?;
    let pipeline = build_pipeline(config)?;

    let started_at = Utc::now();
    let progress = CliProgress::new();
    let report = pipeline.run(state, started_at, force, &progress).await;

    if let Some(run) = history_entry(started_at, Utc::now(), &report.outcome) {
        storage.record_run(&run).await?;
    }
    print_outcome(&report.outcome);

    match &report.outcome {
        RunOutcome::Aborted { stage, reason } | RunOutcome::Failed { stage, reason, .. } => {
            Err(eyre!("run stopped at {stage}: {reason}"))
        }
        _ => Ok(()),
    }
}

async fn cmd_watch(config: &AppConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let mut state = load_state(config, &storage).await?;
    let pipeline = build_pipeline(config)?;

    let minutes = config.schedule.check_interval_minutes.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs(minutes * 60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        check_interval_minutes = minutes,
        frequency_hours = state.frequency_hours,
        "watching schedule, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let started_at = Utc::now();
                let report = pipeline.run(state, started_at, false, &SilentProgress).await;
                if let Some(run) = history_entry(started_at, Utc::now(), &report.outcome) {
                    if let Err(e) = storage.record_run(&run).await {
                        warn!(error = %e, "could not record run");
                    }
                }
                state = report.state;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("stopping");
                break;
            }
        }
    }

    Ok(())
}

async fn cmd_preview(config: &AppConfig, out: Option<&Path>) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let progress = CliProgress::new();

    let composed = pipeline.compose(Utc::now(), &progress).await;
    progress.spinner.finish_and_clear();
    let composed = composed?;

    match out {
        Some(path) => {
            std::fs::write(path, &composed.digest.html)
                .map_err(|e| eyre!("failed to write {}: {e}", path.display()))?;
            println!();
            println!("  Preview written to {}", path.display());
            println!("  Articles:    {}", composed.digest.article_count());
            println!("  Rendered by: {}", composed.render_source);
            println!();
        }
        None => println!("{}", composed.digest.html),
    }
    Ok(())
}

async fn cmd_history(config: &AppConfig, limit: usize) -> Result<()> {
    let path = config.storage.resolved_path()?;
    if !path.exists() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    let storage = Storage::open_readonly(&path).await?;
    let runs = storage.recent_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    println!(
        "{:<20}  {:<8}  {:>8}  {:<8}  DETAIL",
        "FINISHED", "STATUS", "ARTICLES", "RENDER"
    );
    for run in runs {
        let detail = match (&run.stage, &run.reason) {
            (Some(stage), Some(reason)) => format!("{stage}: {reason}"),
            _ => run.message_id.clone().unwrap_or_default(),
        };
        println!(
            "{:<20}  {:<8}  {:>8}  {:<8}  {}",
            run.finished_at.format("%Y-%m-%d %H:%M:%S"),
            run.status,
            run.article_count,
            run.rendered_by.as_deref().unwrap_or("-"),
            detail
        );
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Run history
// ---------------------------------------------------------------------------

/// The history row for a run. Skipped runs are not recorded.
fn history_entry(
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    outcome: &RunOutcome,
) -> Option<NewRun> {
    let run = match outcome {
        RunOutcome::Skipped { .. } => return None,
        RunOutcome::Done {
            digest,
            receipt,
            render_source,
        } => NewRun {
            started_at,
            // last_run is the start of the run that completed.
            finished_at: started_at,
            status: RunStatus::Done,
            stage: None,
            reason: None,
            article_count: digest.article_count(),
            message_id: receipt.message_id.clone(),
            rendered_by: Some(render_source.to_string()),
        },
        RunOutcome::Aborted { stage, reason } => NewRun {
            started_at,
            finished_at,
            status: RunStatus::Aborted,
            stage: Some(stage.to_string()),
            reason: Some(reason.clone()),
            article_count: 0,
            message_id: None,
            rendered_by: None,
        },
        RunOutcome::Failed {
            stage,
            reason,
            article_count,
            render_source,
        } => NewRun {
            started_at,
            finished_at,
            status: RunStatus::Failed,
            stage: Some(stage.to_string()),
            reason: Some(reason.clone()),
            article_count: *article_count,
            message_id: None,
            rendered_by: Some(render_source.to_string()),
        },
    };
    Some(run)
}

fn print_outcome(outcome: &RunOutcome) {
    println!();
    match outcome {
        RunOutcome::Skipped { next_run_at } => {
            println!("  Not due yet.");
            if let Some(next) = next_run_at {
                println!("  Next run: {}", next.format("%Y-%m-%d %H:%M UTC"));
            }
        }
        RunOutcome::Done {
            digest,
            receipt,
            render_source,
        } => {
            println!("  Digest sent!");
            println!("  Articles:    {}", digest.article_count());
            println!("  Sections:    {}", digest.sections.len());
            println!("  Recipients:  {}", receipt.recipients);
            println!("  Rendered by: {render_source}");
            if let Some(id) = &receipt.message_id {
                println!("  Message ID:  {id}");
            }
        }
        RunOutcome::Aborted { stage, reason } => {
            println!("  Run aborted during {stage}: {reason}");
        }
        RunOutcome::Failed { stage, reason, .. } => {
            println!("  Run failed during {stage}: {reason}");
            println!("  The schedule was not advanced; the next run will retry.");
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid progress template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        let message = match stage {
            Stage::Filtering => "Searching news",
            Stage::Enriching => "Enriching articles",
            Stage::Rendering => "Rendering digest",
            Stage::Dispatching => "Sending email",
            _ => return,
        };
        self.spinner.set_message(message);
    }

    fn category_fetched(&self, name: &str, entries: usize) {
        self.spinner
            .set_message(format!("Searching news: {name} ({entries} results)"));
    }

    fn article_enriched(&self, title: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Enriching [{current}/{total}] {title}"));
    }

    fn finished(&self, _outcome: &RunOutcome) {
        self.spinner.finish_and_clear();
    }
}
