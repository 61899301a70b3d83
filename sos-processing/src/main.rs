//! sos-processing - observation processing command line
//!
//! Processes harvested verbatim observations into the inactive storage
//! generation and activates it, or inspects and adjusts the active
//! generation indicator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sos_common::config::{self, TomlConfig, DATABASE_PATH_ENV};
use sos_common::events::EventBus;
use sos_common::models::{Instance, ProviderScope, RunInfo};

use sos_processing::db::reference_data::load_data_providers;
use sos_processing::db::{
    load_transform_context, SqliteInstanceStateStore, SqliteObservationStore, SqliteRunInfoStore,
    SqliteVerbatimSource,
};
use sos_processing::diffusion::PrecisionPolicy;
use sos_processing::services::{JobOutcome, PublishOutcome};
use sos_processing::store::{RunInfoStore, VerbatimSource};
use sos_processing::{BatchProcessor, InstancePublisher, ProcessingJob};

/// Command-line arguments for sos-processing
#[derive(Parser, Debug)]
#[command(name = "sos-processing")]
#[command(about = "Species observation processing pipeline")]
#[command(version)]
struct Args {
    /// TOML configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "SOS_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, env = DATABASE_PATH_ENV)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process providers into the inactive generation
    Process {
        /// Provider ids, comma separated (all registered providers if omitted)
        #[arg(long, value_delimiter = ',')]
        providers: Vec<i32>,

        /// Leave the active generation unchanged after a complete run
        #[arg(long)]
        no_activate: bool,
    },

    /// Activate the inactive generation if every provider's last run succeeded
    Activate {
        /// Provider ids, comma separated (all registered providers if omitted)
        #[arg(long, value_delimiter = ',')]
        providers: Vec<i32>,
    },

    /// Set the active generation without any checks
    OverrideInstance {
        /// Generation to activate (0 or 1)
        instance: u8,
    },

    /// Show the active generation and the latest run of each provider
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = config::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path =
        config::resolve_database_path(args.database.as_deref(), DATABASE_PATH_ENV, &toml_config);
    info!("Database: {}", db_path.display());

    let pool = sos_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let event_bus = EventBus::new(1000);
    let run_info_store = Arc::new(SqliteRunInfoStore::new(
        pool.clone(),
        toml_config.processing.max_lock_wait_ms,
    ));
    let publisher = Arc::new(InstancePublisher::new(
        Arc::new(SqliteInstanceStateStore::new(pool.clone())),
        run_info_store.clone(),
        event_bus.clone(),
    ));

    match args.command {
        Command::Process {
            providers,
            no_activate,
        } => {
            let scope = resolve_scope(&pool, providers).await?;
            let outcome = process(
                &pool,
                &toml_config,
                run_info_store,
                publisher,
                event_bus,
                scope,
                !no_activate,
            )
            .await?;
            print_job_outcome(&outcome);
            if !outcome.failed_provider_ids().is_empty() {
                bail!(
                    "providers without a successful run: {:?}",
                    outcome.failed_provider_ids()
                );
            }
        }
        Command::Activate { providers } => {
            let scope = resolve_scope(&pool, providers).await?;
            let outcome = publisher
                .retry_activation(scope)
                .await
                .context("Activation failed")?;
            print_publish_outcome(&outcome);
            if let PublishOutcome::NotActivated { .. } = outcome {
                bail!("inactive generation not activated");
            }
        }
        Command::OverrideInstance { instance } => {
            let instance = Instance::try_from(instance).context("Invalid instance")?;
            let outcome = publisher
                .override_instance(instance)
                .await
                .context("Override failed")?;
            print_publish_outcome(&outcome);
        }
        Command::Status => {
            let active = publisher.active_instance().await?;
            println!("Active instance: {}", active);
            let runs = run_info_store.latest_run_infos(None).await?;
            if runs.is_empty() {
                println!("No recorded runs");
            }
            for run in &runs {
                print_run_info(run);
            }
        }
    }

    Ok(())
}

async fn process(
    pool: &SqlitePool,
    toml_config: &TomlConfig,
    run_info_store: Arc<SqliteRunInfoStore>,
    publisher: Arc<InstancePublisher>,
    event_bus: EventBus,
    scope: ProviderScope,
    activate: bool,
) -> Result<JobOutcome> {
    let processing = toml_config.processing.clone();
    let context = load_transform_context(
        pool,
        Utc::now().date_naive(),
        PrecisionPolicy::from(&processing),
    )
    .await
    .context("Failed to load reference data")?;
    info!(
        taxa = context.taxa.len(),
        areas = context.areas.len(),
        "Reference data loaded"
    );

    let observations = Arc::new(SqliteObservationStore::new(
        pool.clone(),
        processing.max_lock_wait_ms,
    ));
    let processor = Arc::new(BatchProcessor::new(
        context,
        observations.clone(),
        observations,
        run_info_store,
        processing,
        event_bus.clone(),
    ));
    let job = ProcessingJob::new(processor, publisher, event_bus);

    let sources: Vec<Arc<dyn VerbatimSource>> = scope
        .ids()
        .map(|id| Arc::new(SqliteVerbatimSource::new(pool.clone(), id)) as Arc<dyn VerbatimSource>)
        .collect();

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling processing");
            signal_token.cancel();
        }
    });

    let outcome = job
        .run(scope, sources, activate, &cancel_token)
        .await
        .context("Processing job failed")?;
    Ok(outcome)
}

/// Scope from explicit ids, or every registered provider
async fn resolve_scope(pool: &SqlitePool, providers: Vec<i32>) -> Result<ProviderScope> {
    let ids = if providers.is_empty() {
        load_data_providers(pool)
            .await?
            .into_iter()
            .map(|provider| provider.id)
            .collect()
    } else {
        providers
    };

    let scope = ProviderScope::from_ids(ids).context("Invalid provider id")?;
    if scope.is_empty() {
        bail!("no providers given and none registered");
    }
    Ok(scope)
}

fn print_job_outcome(outcome: &JobOutcome) {
    println!("Job {} wrote generation {}", outcome.job_id, outcome.target);
    for run in &outcome.run_infos {
        print_run_info(run);
    }
    match &outcome.publish {
        Some(publish) => print_publish_outcome(publish),
        None => println!("Activation deferred"),
    }
}

fn print_publish_outcome(outcome: &PublishOutcome) {
    match outcome {
        PublishOutcome::Activated { previous, active } => {
            println!("Active instance switched: {} -> {}", previous, active)
        }
        PublishOutcome::AlreadyActive { active } => {
            println!("Instance {} already active", active)
        }
        PublishOutcome::NotActivated {
            incomplete_provider_ids,
        } => println!(
            "Not activated, providers without a successful run: {:?}",
            incomplete_provider_ids
        ),
    }
}

fn print_run_info(run: &RunInfo) {
    println!(
        "  provider {:>2}  instance {}  {:<8}  {} processed, {} invalid  started {}{}",
        run.data_provider_id,
        run.instance,
        run.status.as_str(),
        run.count,
        run.invalid_count,
        run.start.format("%Y-%m-%d %H:%M:%S"),
        run.message
            .as_deref()
            .map(|message| format!("  ({})", message))
            .unwrap_or_default()
    );
}
