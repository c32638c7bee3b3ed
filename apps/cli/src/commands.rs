//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use kbsync_core::{
    CleanOptions, EntitySnapshot, KnowledgeService, RefreshOutcome, SnapshotStatus, SourceReport,
    SyncProgress,
};
use kbsync_shared::{
    AppConfig, EntityType, KbSyncError, init_config, load_config, load_config_from, render_config,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbsync: local, self-refreshing store of Ecuadorian geographic entities.
#[derive(Parser)]
#[command(
    name = "kbsync",
    version,
    about = "Sync provinces, national parks, heritage sites and plazas from Wikidata and DBpedia.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Database path (overrides `[store] path`).
    #[arg(long, global = true, env = "KBSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Config file (defaults to ~/.kbsync/kbsync.toml).
    #[arg(long, global = true, env = "KBSYNC_CONFIG")]
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
    /// Print the records of one entity type, refreshing them first if stale.
    Entities {
        /// province, national_park, heritage_site or plaza.
        #[arg(value_name = "TYPE")]
        entity_type: EntityType,

        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Refresh one entity type, or `all`, from the remote sources.
    Refresh {
        /// Entity type or `all`.
        #[arg(value_name = "TYPE")]
        target: String,

        /// Refresh even if the stored records are within their TTL.
        #[arg(long)]
        force: bool,
    },

    /// Show freshness per entity type and recent sync passes.
    Status {
        /// Number of recent sync passes to list.
        #[arg(long, default_value = "5")]
        runs: u32,
    },

    /// Search stored entity names (accent-insensitive).
    Search {
        query: String,

        /// Maximum hits per entity type.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Remove records outside the configured region, or not synced recently.
    Clean {
        /// Only clean this entity type.
        #[arg(long = "type", value_name = "TYPE")]
        entity_type: Option<EntityType>,

        /// Also remove records not synced in this many days.
        #[arg(long)]
        not_synced_days: Option<u64>,
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
        0 => "kbsync=info",
        1 => "kbsync=debug",
        _ => "kbsync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    let config = resolve_config(cli.config.as_deref(), cli.db.as_deref())?;

    match cli.command {
        Command::Entities { entity_type, json } => cmd_entities(&config, entity_type, json).await,
        Command::Refresh { target, force } => cmd_refresh(&config, &target, force).await,
        Command::Status { runs } => cmd_status(&config, runs).await,
        Command::Search { query, limit } => cmd_search(&config, &query, limit).await,
        Command::Clean {
            entity_type,
            not_synced_days,
        } => cmd_clean(&config, entity_type, not_synced_days).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

/// Config file (explicit or default), then `--db` on top.
fn resolve_config(path: Option<&Path>, db: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(db) = db {
        config.store.path = Some(db.to_string_lossy().into_owned());
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner on stderr while sync passes run.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl SyncProgress for CliProgress {
    fn phase(&self, entity_type: EntityType, name: &str) {
        self.spinner.set_message(format!("{entity_type}: {name}"));
    }

    fn source_finished(&self, entity_type: EntityType, report: &SourceReport) {
        let line = match &report.error {
            Some(error) => format!("  {entity_type}: {} failed: {error}", report.source),
            None => format!(
                "  {entity_type}: {} returned {} rows, {} entities ({} ms)",
                report.source, report.rows, report.dtos, report.elapsed_ms
            ),
        };
        self.spinner.println(line);
    }

    fn done(&self, entity_type: EntityType, outcome: &RefreshOutcome) {
        if let RefreshOutcome::Refreshed(stats) = outcome {
            self.spinner.println(format!(
                "  {entity_type}: {} records ({} new, {} updated, {} unchanged)",
                stats.records, stats.commit.inserted, stats.commit.updated, stats.commit.unchanged
            ));
        }
        self.spinner.set_message(String::new());
    }
}

async fn open_service(
    config: &AppConfig,
    progress: Option<Arc<CliProgress>>,
) -> Result<KnowledgeService> {
    let service = KnowledgeService::open(config).await?;
    Ok(match progress {
        Some(progress) => service.with_progress(progress),
        None => service,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_entities(config: &AppConfig, entity_type: EntityType, json: bool) -> Result<()> {
    let progress = (!json).then(|| Arc::new(CliProgress::new()));
    let service = open_service(config, progress.clone()).await?;

    let snapshot = service.get_entities(entity_type).await?;
    if let Some(progress) = &progress {
        progress.finish();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    print_status_line(&snapshot);
    println!();
    for record in &snapshot.records {
        println!("  {:<40} {}", record.key, record.name);
    }
    println!();
    println!("  {} records", snapshot.records.len());
    Ok(())
}

async fn cmd_refresh(config: &AppConfig, target: &str, force: bool) -> Result<()> {
    let progress = Arc::new(CliProgress::new());
    let service = open_service(config, Some(Arc::clone(&progress))).await?;

    info!(entity = target, force, "refreshing");
    let snapshots = if target.eq_ignore_ascii_case("all") {
        service.refresh_all(force).await?
    } else {
        let entity_type: EntityType = target.parse()?;
        let snapshot = if force {
            service.force_refresh(entity_type).await?
        } else {
            service.get_entities(entity_type).await?
        };
        vec![snapshot]
    };
    progress.finish();

    let mut failed = 0;
    for snapshot in &snapshots {
        print_status_line(snapshot);
        if matches!(
            snapshot.status,
            SnapshotStatus::RefreshFailed(_) | SnapshotStatus::RefreshInProgress
        ) {
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(eyre!("{failed} of {} entity types were not refreshed", snapshots.len()));
    }
    Ok(())
}

fn print_status_line(snapshot: &EntitySnapshot) {
    let synced = snapshot
        .last_synced_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".into());
    let status = match &snapshot.status {
        SnapshotStatus::Fresh => "fresh".to_string(),
        SnapshotStatus::Refreshed(stats) if stats.partial() => {
            format!("refreshed from partial sources in {} ms", stats.duration_ms)
        }
        SnapshotStatus::Refreshed(stats) => format!("refreshed in {} ms", stats.duration_ms),
        SnapshotStatus::RefreshFailed(reason) => format!("refresh failed: {reason}"),
        SnapshotStatus::RefreshInProgress => "refresh still running elsewhere".to_string(),
        SnapshotStatus::CoolingDown => "stale, retry after cooldown".to_string(),
    };
    println!(
        "{:<14} {:>5} records  synced {synced}  ({status})",
        snapshot.entity_type,
        snapshot.records.len()
    );
}

async fn cmd_status(config: &AppConfig, runs: u32) -> Result<()> {
    let service = open_service(config, None).await?;

    println!();
    println!("  {:<14} {:<15} {:>8} {:>8}  LAST SYNC", "TYPE", "STATE", "RECORDS", "TTL");
    for row in service.status().await? {
        let synced = row
            .last_synced_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".into());
        println!(
            "  {:<14} {:<15} {:>8} {:>7}s  {synced}",
            row.entity_type, row.state, row.records, row.ttl_secs
        );
    }

    let recent = service.recent_runs(runs).await?;
    if !recent.is_empty() {
        println!();
        println!("  Recent sync passes:");
        for run in recent {
            println!(
                "  {}  {:<14} {}",
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.entity_type,
                run.outcome.as_deref().unwrap_or("running")
            );
        }
    }
    println!();
    Ok(())
}

async fn cmd_search(config: &AppConfig, query: &str, limit: u32) -> Result<()> {
    let service = open_service(config, None).await?;
    let hits = service.search(query, limit).await?;

    if hits.is_empty() {
        println!("No matches for '{query}'.");
        return Ok(());
    }
    for hit in hits {
        println!("  {:<14} {:<40} {}", hit.entity_type, hit.key, hit.name);
    }
    Ok(())
}

fn days_to_duration(days: u64) -> std::result::Result<Duration, KbSyncError> {
    days.checked_mul(24 * 60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| KbSyncError::config(format!("--not-synced-days {days} is too large")))
}

async fn cmd_clean(
    config: &AppConfig,
    entity_type: Option<EntityType>,
    not_synced_days: Option<u64>,
) -> Result<()> {
    let service = open_service(config, None).await?;
    let options = CleanOptions {
        types: entity_type.into_iter().collect(),
        not_synced_for: not_synced_days.map(days_to_duration).transpose()?,
    };

    let reports = service.clean(&options).await?;
    for (entity_type, report) in reports {
        println!(
            "  {entity_type:<14} {} outside region, {} not synced recently",
            report.outside_region, report.not_synced
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
    println!("{}", render_config(config)?);
    Ok(())
}
