//! Pipeline and store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::errors::PipelineError;
use crate::identity::SourcePriorities;

/// Connection settings for the graph store.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoreConfig {
    /// Bolt URI (e.g. `bolt://localhost:7687`).
    #[validate(length(min = 1))]
    pub uri: String,

    pub user: String,

    /// Required when the Neo4j backend is selected; checked by the caller.
    #[serde(default, skip_serializing)]
    pub password: String,

    #[validate(length(min = 1))]
    pub database: String,

    #[validate(range(min = 1, max = 256))]
    pub max_connections: usize,

    #[validate(range(min = 1, max = 600))]
    pub connect_timeout_secs: u64,

    /// Per-batch write timeout. Elapsing counts as a transient failure.
    #[validate(range(min = 1, max = 3600))]
    pub write_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
            max_connections: 16,
            connect_timeout_secs: 10,
            write_timeout_secs: 60,
        }
    }
}

impl StoreConfig {
    /// Load from `NEO4J_*`, `CONNECT_TIMEOUT_SECS` and `WRITE_TIMEOUT_SECS`.
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            uri: env_string("NEO4J_URI").unwrap_or(defaults.uri),
            user: env_string("NEO4J_USER").unwrap_or(defaults.user),
            password: env_string("NEO4J_PASSWORD").unwrap_or(defaults.password),
            database: env_string("NEO4J_DATABASE").unwrap_or(defaults.database),
            max_connections: env_parse("NEO4J_MAX_CONNECTIONS", defaults.max_connections)?,
            connect_timeout_secs: env_parse("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs)?,
            write_timeout_secs: env_parse("WRITE_TIMEOUT_SECS", defaults.write_timeout_secs)?,
        };

        config.validate().map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Settings for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Maximum items per store transaction.
    #[validate(range(min = 1, max = 10000))]
    pub batch_size: usize,

    /// Retries after the first attempt of a batch.
    #[validate(range(max = 20))]
    pub max_retries: u32,

    #[validate(range(min = 1, max = 60000))]
    pub retry_base_delay_ms: u64,

    #[validate(range(min = 1, max = 600000))]
    pub retry_max_delay_ms: u64,

    /// Batches in flight at once.
    #[validate(range(min = 1, max = 64))]
    pub load_concurrency: usize,

    /// Blocking tasks running the transformer.
    #[validate(range(min = 1, max = 256))]
    pub transform_workers: usize,

    /// Capacity of the extract → transform channel.
    #[validate(range(min = 1, max = 1000000))]
    pub queue_capacity: usize,

    /// Report what would be written without touching the store.
    pub dry_run: bool,

    /// Abort on any validation or load failure.
    pub strict: bool,

    pub run_timeout_secs: Option<u64>,

    pub source_priorities: SourcePriorities,

    /// Progress file for resumable runs.
    pub checkpoint_path: Option<PathBuf>,

    #[validate(nested)]
    pub store: StoreConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_retries: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 10_000,
            load_concurrency: 4,
            transform_workers: 4,
            queue_capacity: 1024,
            dry_run: false,
            strict: false,
            run_timeout_secs: None,
            source_priorities: SourcePriorities::default(),
            checkpoint_path: None,
            store: StoreConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` first (non-fatal if `.env` is absent).
    /// A variable that is present but unparsable yields
    /// [`PipelineError::Config`] naming it.
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let source_priorities = match env_string("SOURCE_PRIORITIES") {
            Some(raw) => raw
                .parse::<SourcePriorities>()
                .map_err(|e| PipelineError::Config(format!("SOURCE_PRIORITIES: {e}")))?,
            None => defaults.source_priorities,
        };

        let run_timeout_secs = match env_string("RUN_TIMEOUT_SECS") {
            Some(raw) => Some(parse_var::<u64>("RUN_TIMEOUT_SECS", &raw)?),
            None => None,
        };

        let config = Self {
            batch_size: env_parse("BATCH_SIZE", defaults.batch_size)?,
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries)?,
            retry_base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms)?,
            retry_max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms)?,
            load_concurrency: env_parse("LOAD_CONCURRENCY", defaults.load_concurrency)?,
            transform_workers: env_parse("TRANSFORM_WORKERS", defaults.transform_workers)?,
            queue_capacity: env_parse("QUEUE_CAPACITY", defaults.queue_capacity)?,
            dry_run: env_bool("DRY_RUN", defaults.dry_run)?,
            strict: env_bool("STRICT", defaults.strict)?,
            run_timeout_secs,
            source_priorities,
            checkpoint_path: defaults.checkpoint_path,
            store: StoreConfig::from_env()?,
        };

        config.check()?;
        Ok(config)
    }

    /// Run the derived validators plus the cross-field checks.
    pub fn check(&self) -> crate::Result<()> {
        self.validate().map_err(|e| PipelineError::Config(e.to_string()))?;
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(PipelineError::Config(format!(
                "RETRY_MAX_DELAY_MS ({}) must be >= RETRY_BASE_DELAY_MS ({})",
                self.retry_max_delay_ms, self.retry_base_delay_ms
            )));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(PipelineError::Config("RUN_TIMEOUT_SECS must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

// ── Environment helpers ──────────────────────────────────────────────────────

/// Non-empty value of `name`, trimmed.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn env_parse<T: FromStr>(name: &str, default: T) -> crate::Result<T> {
    match env_string(name) {
        Some(raw) => parse_var(name, &raw),
        None => Ok(default),
    }
}

/// Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_bool(name: &str, default: bool) -> crate::Result<bool> {
    let Some(raw) = env_string(name) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PipelineError::Config(format!("{name} must be a boolean, got '{raw}'"))),
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> crate::Result<T> {
    raw.parse::<T>()
        .map_err(|_| PipelineError::Config(format!("{name} has an invalid value '{raw}'")))
}
