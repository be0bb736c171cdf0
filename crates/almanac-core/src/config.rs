use anyhow::Result;
use config::Config;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Events whose expansion is logged candidate by candidate.
    #[serde(default)]
    pub trace_events: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Identity written to `lock_owner` and appended to event edit history.
    pub worker_id: String,
    pub lock_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub horizon_days: u32,
    pub max_entry_age_days: u32,
    pub poll_interval_secs: u64,
    pub user_agent: String,
}

fn default_worker_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| "worker".to_owned())
}

impl Settings {
    /// ## Summary
    /// Loads configuration from environment variables and an optional `config.toml`
    /// into a `Settings`. Environment variables use the `ALMANAC_` prefix and `__`
    /// between section and key, e.g. `ALMANAC_SYNC__HORIZON_DAYS=90`.
    ///
    /// ## Errors
    /// Returns an error if building the configuration or deserializing it fails.
    pub fn load() -> Result<Self> {
        Ok(Config::builder()
            .set_default("database.max_connections", 4)?
            .set_default("logging.level", "info")?
            .set_default("sync.worker_id", default_worker_id())?
            .set_default("sync.lock_timeout_secs", 1800)?
            .set_default("sync.fetch_timeout_secs", 30)?
            .set_default("sync.horizon_days", 180)?
            .set_default("sync.max_entry_age_days", 365)?
            .set_default("sync.poll_interval_secs", 60)?
            .set_default(
                "sync.user_agent",
                concat!("almanac/", env!("CARGO_PKG_VERSION")),
            )?
            // TOML file
            .add_source(config::File::with_name("config.toml").required(false))
            // Env
            .add_source(
                config::Environment::with_prefix("ALMANAC")
                    .prefix_separator("_")
                    .separator("__")
                    .convert_case(config::Case::Snake)
                    .ignore_empty(true)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("logging.trace_events"),
            )
            .build()?
            .try_deserialize::<Settings>()?)
    }
}

/// ## Summary
/// Loads configuration from environment variables and `.env` file.
///
/// ## Errors
/// Returns an error if loading or deserializing the configuration fails.
pub fn load_config() -> Result<Settings> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "No .env file loaded");
    }

    Settings::load()
}
