use std::path::PathBuf;
use std::str::FromStr;

use pharmagraph::transform::RecordKind;
use pharmagraph::types::{env_bool, env_string};
use pharmagraph::PipelineConfig;

/// Which graph store the run writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local store; the graph is discarded on exit.
    Memory,
    Neo4j,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "neo4j" => Ok(StoreBackend::Neo4j),
            other => anyhow::bail!("Invalid STORE_BACKEND '{other}': expected 'memory' or 'neo4j'"),
        }
    }
}

/// Runner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// A `.jsonl` file or a directory of them. Env: `SOURCE_PATH`, required.
    pub source_path: PathBuf,
    /// Name given to bare-payload records. Env: `SOURCE_NAME`, default: the path's file stem.
    pub source_name: String,
    /// Env: `SOURCE_PATTERN`, default `*.jsonl`.
    pub source_pattern: Option<String>,
    /// Env: `RECURSIVE`, default false.
    pub recursive: bool,
    /// Record kind for payloads without `record_type`. Env: `SOURCE_KIND`.
    pub source_kind: Option<RecordKind>,
    /// Where the JSON run report is written. Env: `REPORT_PATH`.
    pub report_path: Option<PathBuf>,
    /// Env: `STORE_BACKEND`, default `memory`.
    pub backend: StoreBackend,
    /// Everything the library reads itself, plus `CHECKPOINT_PATH`.
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns an error if `SOURCE_PATH` is missing, a variable cannot be
    /// parsed, or `STORE_BACKEND=neo4j` without `NEO4J_PASSWORD`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut pipeline = PipelineConfig::from_env()?;
        pipeline.checkpoint_path = env_string("CHECKPOINT_PATH").map(PathBuf::from);

        let source_path = env_string("SOURCE_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("SOURCE_PATH is required"))?;
        let source_name = match env_string("SOURCE_NAME") {
            Some(name) => name,
            None => source_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow::anyhow!("SOURCE_NAME is required when SOURCE_PATH has no file name"))?,
        };
        let source_kind = match env_string("SOURCE_KIND") {
            Some(raw) => Some(
                raw.parse::<RecordKind>()
                    .map_err(|e| anyhow::anyhow!("Invalid SOURCE_KIND: {e}"))?,
            ),
            None => None,
        };
        let backend = match env_string("STORE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => StoreBackend::Memory,
        };
        if backend == StoreBackend::Neo4j && pipeline.store.password.is_empty() {
            anyhow::bail!("NEO4J_PASSWORD is required when STORE_BACKEND=neo4j");
        }

        Ok(Config {
            source_path,
            source_name,
            source_pattern: env_string("SOURCE_PATTERN"),
            recursive: env_bool("RECURSIVE", false)?,
            source_kind,
            report_path: env_string("REPORT_PATH").map(PathBuf::from),
            backend,
            pipeline,
        })
    }

    /// Check that the source path exists before anything is opened.
    pub async fn validate_source(&self) -> anyhow::Result<()> {
        tokio::fs::metadata(&self.source_path).await.map_err(|e| {
            anyhow::anyhow!(
                "Cannot access source path '{}': {}",
                self.source_path.display(),
                e
            )
        })?;
        Ok(())
    }
}
