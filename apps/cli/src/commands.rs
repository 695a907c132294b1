//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::{info, warn};

use provdir_core::{BatchEngine, BatchHandle, BatchOptions, Orchestrator, RetryPolicy};
use provdir_export::{outreach_notice, write_csv_file, write_json_file};
use provdir_scoring::{ScoringEngine, rank_for_review};
use provdir_services::{
    Collaborators, LocalContactValidator, NppesRegistry, RegistryLookup, StaticRegistry,
    TextDocumentExtractor,
};
use provdir_shared::{
    AppConfig, DirectoryEntry, EnrichmentResult, ProviderInput, RiskLevel, ValidationResult,
    init_config, load_config,
};
use provdir_storage::{EntryFilter, ResultStore};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// provdir: validate, enrich, and score healthcare provider records.
#[derive(Parser)]
#[command(
    name = "provdir",
    version,
    about = "Validate, enrich, and score healthcare provider directory records.",
    long_about = None,
)]
pub(crate) struct Cli {
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
    /// Run a batch of provider records through the pipeline.
    Run {
        /// JSON file holding an array of provider records.
        #[arg(short, long)]
        input: PathBuf,

        /// Maximum records processed at once (overrides config).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Per-record time budget in milliseconds (overrides config).
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Write directory entries as JSON.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Write directory entries as CSV.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Persist the batch to a result database.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Do not call the public registry; use a local snapshot instead.
        #[arg(long)]
        offline: bool,

        /// Registry snapshot (license number → record) for offline runs.
        #[arg(long, requires = "offline")]
        registry_snapshot: Option<PathBuf>,
    },

    /// Score a single validation/enrichment pair.
    Score {
        /// JSON file with `validation` and optional `enrichment` objects.
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show the manual review queue from a result database.
    Report {
        /// Result database written by `provdir run --db`.
        #[arg(long)]
        db: PathBuf,

        /// Only show entries at this risk level.
        #[arg(long)]
        risk: Option<RiskLevel>,

        /// Only show entries at or above this confidence.
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Maximum entries to show.
        #[arg(long)]
        limit: Option<u32>,

        /// Print an outreach notice for the top-priority entry.
        #[arg(long)]
        notice: bool,
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
        0 => "provdir=info",
        1 => "provdir=debug",
        _ => "provdir=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            input,
            concurrency,
            timeout_ms,
            out,
            csv,
            db,
            offline,
            registry_snapshot,
        } => {
            let args = RunArgs {
                input,
                concurrency,
                timeout_ms,
                out,
                csv,
                db,
                offline,
                registry_snapshot,
            };
            cmd_run(args).await
        }
        Command::Score { input } => cmd_score(&input).await,
        Command::Report {
            db,
            risk,
            min_confidence,
            limit,
            notice,
        } => cmd_report(&db, risk, min_confidence, limit, notice).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunArgs {
    input: PathBuf,
    concurrency: Option<usize>,
    timeout_ms: Option<u64>,
    out: Option<PathBuf>,
    csv: Option<PathBuf>,
    db: Option<PathBuf>,
    offline: bool,
    registry_snapshot: Option<PathBuf>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read '{}': {e}", path.display()))?;
    serde_json::from_str(&content).map_err(|e| eyre!("invalid JSON in '{}': {e}", path.display()))
}

/// Apply CLI overrides on top of the file config.
fn batch_options(config: &AppConfig, concurrency: Option<usize>, timeout_ms: Option<u64>) -> BatchOptions {
    let mut options = BatchOptions::from(&config.batch);
    if let Some(limit) = concurrency {
        options.concurrency_limit = limit;
    }
    if let Some(ms) = timeout_ms {
        options.per_record_timeout = Duration::from_millis(ms);
    }
    options
}

fn build_collaborators(
    config: &AppConfig,
    offline: bool,
    snapshot: Option<&Path>,
) -> Result<Collaborators> {
    let registry: Arc<dyn RegistryLookup> = if offline {
        let registry = match snapshot {
            Some(path) => StaticRegistry::from_json_file(path)?,
            None => StaticRegistry::new(),
        };
        if registry.is_empty() {
            warn!("offline registry snapshot is empty; specialties will not verify");
        }
        Arc::new(registry)
    } else {
        Arc::new(NppesRegistry::new(&config.registry)?)
    };

    Ok(Collaborators::new(
        Arc::new(LocalContactValidator::new()),
        registry,
        Arc::new(TextDocumentExtractor::new()),
    ))
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    let options = batch_options(&config, args.concurrency, args.timeout_ms);

    // Bad weights or thresholds stop the run before any record is touched.
    let scoring = ScoringEngine::new(config.scoring.clone())?;
    let collaborators =
        build_collaborators(&config, args.offline, args.registry_snapshot.as_deref())?;

    let inputs: Vec<ProviderInput> = read_json(&args.input)?;
    info!(
        input = %args.input.display(),
        records = inputs.len(),
        concurrency = options.concurrency_limit,
        offline = args.offline,
        "starting run"
    );

    let orchestrator = Orchestrator::new(
        collaborators,
        Arc::new(scoring),
        RetryPolicy::from(&config.retry),
    );
    let handle = BatchEngine::new(orchestrator).submit(inputs, options)?;

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling batch");
            ctrl_c_handle.cancel();
        }
    });

    let bar = CliProgress::new(handle.progress().total);
    bar.follow(&handle).await;
    let report = handle.wait().await?;
    bar.finish();

    let entries: Vec<DirectoryEntry> = report.entries().cloned().collect();

    if let Some(db_path) = &args.db {
        let store = ResultStore::open(db_path).await?;
        store.insert_batch(&report.batch_id, report.summary.total).await?;
        store.save_outcomes(&report.batch_id, &report.outcomes).await?;
        store.finish_batch(&report.batch_id, &report.summary).await?;
    }
    if let Some(path) = &args.out {
        write_json_file(path, &entries)?;
    }
    if let Some(path) = &args.csv {
        write_csv_file(path, &entries)?;
    }

    let s = &report.summary;
    println!();
    println!("  Batch {}", report.batch_id);
    println!("  Records:     {}", s.total);
    println!("  Done:        {}", s.done);
    println!(
        "  Failed:      {} ({} timed out, {} cancelled)",
        s.failed, s.timed_out, s.cancelled
    );
    println!(
        "  Risk:        {} low / {} medium / {} high",
        s.low_risk, s.medium_risk, s.high_risk
    );
    println!("  Review:      {}", s.needs_review);
    println!("  Avg score:   {:.3}", s.average_confidence);
    println!("  Success:     {:.1}%", s.success_rate * 100.0);
    println!("  Time:        {:.1}s", s.elapsed_ms as f64 / 1000.0);
    println!();

    for failed in report.failures() {
        println!("  ✗ {} [{}] {}", failed.input.id, failed.reason, failed.detail);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress bar
// ---------------------------------------------------------------------------

/// Batch progress bar driven by polling the handle's snapshot.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    async fn follow(&self, handle: &BatchHandle) {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        while handle.poll().is_none() {
            ticker.tick().await;
            let progress = handle.progress();
            self.bar.set_position(progress.finished() as u64);
            let cancelling = if handle.is_cancelled() { ", cancelling" } else { "" };
            self.bar.set_message(format!(
                "{} in flight, {} failed{cancelling}",
                progress.in_flight, progress.failed
            ));
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// score
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ScoreInput {
    validation: ValidationResult,
    #[serde(default)]
    enrichment: EnrichmentResult,
}

async fn cmd_score(input: &Path) -> Result<()> {
    let config = load_config()?;
    let engine = ScoringEngine::new(config.scoring)?;
    let pair: ScoreInput = read_json(input)?;

    let assessment = engine.score(&pair.validation, &pair.enrichment);
    println!("{}", serde_json::to_string_pretty(&assessment)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// report
// ---------------------------------------------------------------------------

async fn cmd_report(
    db: &Path,
    risk: Option<RiskLevel>,
    min_confidence: Option<f64>,
    limit: Option<u32>,
    notice: bool,
) -> Result<()> {
    let store = ResultStore::open_readonly(db).await?;
    let Some(batch) = store.latest_batch().await? else {
        println!("No batches recorded in {}", db.display());
        return Ok(());
    };

    let filter = EntryFilter {
        batch_id: Some(batch.id.clone()),
        risk,
        min_confidence,
        limit: None,
    };
    let entries = store.list_entries(&filter).await?;
    let failures = store.list_failures(Some(&batch.id)).await?;

    let mut queue = rank_for_review(&entries);
    if let Some(limit) = limit {
        queue.truncate(limit as usize);
    }

    println!();
    println!(
        "  Batch {} ({} entries, {} failed records)",
        batch.id,
        entries.len(),
        failures.len()
    );
    println!();
    println!(
        "  {:>8}  {:<6}  {:<14}  {:<28}  {:<6}  {:>6}  {}",
        "PRIORITY", "BAND", "PROVIDER", "NAME", "RISK", "SCORE", "REVIEW"
    );
    for item in &queue {
        println!(
            "  {:>8.1}  {:<6}  {:<14}  {:<28}  {:<6}  {:>6.3}  {}",
            item.priority_score,
            item.priority_category,
            item.provider_id,
            item.name,
            item.risk_level,
            item.confidence_score,
            if item.needs_manual_review { "yes" } else { "" }
        );
    }
    println!();

    if notice {
        let top = queue
            .first()
            .and_then(|item| entries.iter().find(|e| e.provider_id == item.provider_id));
        match top {
            Some(entry) => println!("{}", outreach_notice(entry)),
            None => println!("No entries to notify."),
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
