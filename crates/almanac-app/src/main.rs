use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt};
use uuid::Uuid;

use almanac_core::config::load_config;
use almanac_core::time;
use almanac_db::db::connection::create_pool;
use almanac_db::db::migrate::run_migrations;
use almanac_db::db::store::PgStore;
use almanac_service::feed::{HttpFetcher, SyncOptions, Synchronizer};
use almanac_service::occurrence::{ExpansionTrace, MaterializeOptions, regenerate_events};

mod worker;

#[derive(Parser)]
#[command(name = "almanac")]
#[command(about = "Expand recurring events and keep subscribed calendar feeds in sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for due sources until interrupted (the default)
    Run,
    /// Sync every due source once and exit
    Once,
    /// Sync a single source now
    Sync { source: Uuid },
    /// Rematerialize the occurrences of the given events
    Regenerate {
        #[arg(required = true)]
        events: Vec<Uuid>,
    },
    /// Delete every event of a source and deactivate it
    RemoveSource { source: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (filter_layer, filter_handle) = reload::Layer::new(EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    let config = load_config()?;

    tracing::info!(config = ?config, "Configuration loaded");

    if let Ok(filter) = EnvFilter::try_new(config.logging.level.as_str()) {
        if let Err(e) = filter_handle.modify(|current| *current = filter) {
            tracing::warn!(error = %e, "Failed to update log filter from config");
        }
    } else {
        tracing::warn!(level = %config.logging.level, "Invalid log level in config, keeping info");
    }

    let applied = run_migrations(&config.database.url).await?;
    tracing::info!(applied, "Database migrations up to date");

    let pool = create_pool(
        &config.database.url,
        u32::from(config.database.max_connections),
    )
    .await?;
    let store = PgStore::new(pool);
    let trace = ExpansionTrace::new(config.logging.trace_events.iter().copied());

    let synchronizer = Synchronizer::new(
        store.clone(),
        HttpFetcher::new(&config.sync)?,
        SyncOptions::from_config(
            &config.sync,
            usize::from(config.database.max_connections),
            trace.clone(),
        ),
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => worker::run(&synchronizer, config.sync.poll_interval_secs).await,
        Commands::Once => worker::sync_due(&synchronizer).await?,
        Commands::Sync { source } => {
            let outcome = synchronizer.sync_source(source).await?;
            tracing::info!(source_id = %source, ?outcome, "Source synced");
        }
        Commands::Regenerate { events } => {
            let options = MaterializeOptions::new(time::now())
                .with_horizon_days(config.sync.horizon_days)
                .with_trace(trace);
            let report = regenerate_events(&store, &events, &options).await;
            for (id, error) in &report.failed {
                tracing::error!(event_id = %id, %error, "Regeneration failed");
            }
            anyhow::ensure!(
                report.is_success(),
                "{} of {} events failed to regenerate",
                report.failed.len(),
                events.len()
            );
        }
        Commands::RemoveSource { source } => {
            let deleted = synchronizer.delete_source_events(source).await?;
            tracing::info!(source_id = %source, deleted = deleted.len(), "Source removed");
        }
    }

    Ok(())
}
