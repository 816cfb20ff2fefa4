mod config;

use std::path::{Path, PathBuf};

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pharmagraph::pipeline::RunReportBuilder;
use pharmagraph::source::{Extractor, JsonLinesConfig, JsonLinesExtractor};
use pharmagraph::transform::PharmaTransformer;
use pharmagraph::types::env_string;
use pharmagraph::{GraphStore, InMemoryGraphStore, Pipeline, RunReport};

use crate::config::{Config, StoreBackend};

fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pharmagraph=info".parse()?)
                .add_directive("pharmagraph_runner=info".parse()?),
        )
        .json()
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    let code = runtime.block_on(run());
    // Dropping the runtime first lets background tasks wind down before exit.
    drop(runtime);
    std::process::exit(code);
}

/// Load configuration, run one ingestion, write the report and return the exit code.
async fn run() -> i32 {
    info!("pharmagraph-runner starting");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let (report, report_path) = match Config::from_env() {
        Ok(config) => (run_ingestion(&config, cancel).await, config.report_path.clone()),
        Err(e) => (
            setup_failed(false, "Configuration error", &e),
            env_string("REPORT_PATH").map(PathBuf::from),
        ),
    };
    finish(&report, report_path.as_deref())
}

/// Run one ingestion for `config`. Errors before the pipeline starts become
/// a failed report.
async fn run_ingestion(config: &Config, cancel: CancellationToken) -> RunReport {
    match execute(config, cancel).await {
        Ok(report) => report,
        Err(e) => setup_failed(config.pipeline.dry_run, "Run setup failed", &e),
    }
}

async fn execute(config: &Config, cancel: CancellationToken) -> anyhow::Result<RunReport> {
    config.validate_source().await?;

    info!(
        source = %config.source_path.display(),
        source_name = %config.source_name,
        backend = ?config.backend,
        dry_run = config.pipeline.dry_run,
        strict = config.pipeline.strict,
        "configuration loaded"
    );

    // ── Pipeline ──────────────────────────────────────────────────────────────
    let mut transformer = PharmaTransformer::new();
    if let Some(kind) = config.source_kind {
        transformer = transformer.with_default_kind(config.source_name.clone(), kind);
    }
    let pipeline = Pipeline::new(config.pipeline.clone(), transformer)?.with_cancellation(cancel);

    let mut source = JsonLinesConfig::new(config.source_name.clone(), config.source_path.clone());
    source.recursive = config.recursive;
    if let Some(pattern) = &config.source_pattern {
        source.pattern = pattern.clone();
    }
    let extractors: Vec<Box<dyn Extractor>> = vec![Box::new(JsonLinesExtractor::new(source))];

    // ── Run ───────────────────────────────────────────────────────────────────
    match config.backend {
        StoreBackend::Memory => Ok(run_with(&pipeline, &extractors, &InMemoryGraphStore::new()).await),
        StoreBackend::Neo4j => run_neo4j(&pipeline, &extractors, config).await,
    }
}

/// Failed report for an error raised before the pipeline ran.
fn setup_failed(dry_run: bool, context: &str, e: &anyhow::Error) -> RunReport {
    error!("{}: {:#}", context, e);
    RunReportBuilder::new(dry_run).fail(format!("{context}: {e:#}"))
}

/// Persist and print `report`, then map it to the process exit code.
fn finish(report: &RunReport, report_path: Option<&Path>) -> i32 {
    if let Some(path) = report_path {
        if let Err(e) = report.persist(path) {
            error!(path = %path.display(), error = %e, "failed to write run report");
        }
    }
    println!("{report}");

    let code = report.exit_code();
    info!(run_id = %report.run_id, exit_code = code, "pharmagraph-runner finished");
    code
}

async fn run_with<S: GraphStore>(
    pipeline: &Pipeline<PharmaTransformer>,
    extractors: &[Box<dyn Extractor>],
    store: &S,
) -> RunReport {
    pipeline.run(extractors, store).await
}

#[cfg(feature = "neo4j")]
async fn run_neo4j(
    pipeline: &Pipeline<PharmaTransformer>,
    extractors: &[Box<dyn Extractor>],
    config: &Config,
) -> anyhow::Result<RunReport> {
    use pharmagraph::driver::neo4j::Neo4jGraphStore;

    let store = Neo4jGraphStore::connect(&config.pipeline.store).await?;
    Ok(run_with(pipeline, extractors, &store).await)
}

#[cfg(not(feature = "neo4j"))]
async fn run_neo4j(
    _pipeline: &Pipeline<PharmaTransformer>,
    _extractors: &[Box<dyn Extractor>],
    _config: &Config,
) -> anyhow::Result<RunReport> {
    anyhow::bail!("STORE_BACKEND=neo4j requires the runner to be built with the `neo4j` feature")
}

/// Cancel the run on SIGTERM or Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl-C, cancelling run"); }
        _ = terminate => { info!("received SIGTERM, cancelling run"); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmagraph::{PipelineConfig, RunStatus, Stage};

    fn config(source_path: PathBuf, backend: StoreBackend) -> Config {
        let mut pipeline = PipelineConfig::default();
        pipeline.store.uri = "bolt://127.0.0.1:1".to_string();
        pipeline.store.password = "secret".to_string();
        pipeline.store.connect_timeout_secs = 1;
        Config {
            source_path,
            source_name: "chembl".to_string(),
            source_pattern: None,
            recursive: false,
            source_kind: None,
            report_path: None,
            backend,
            pipeline,
        }
    }

    fn stages(report: &RunReport) -> Vec<Stage> {
        report.transitions.iter().map(|t| t.stage).collect()
    }

    #[tokio::test]
    async fn test_missing_source_fails_with_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report_path = dir.path().join("reports/run.json");
        let mut config = config(dir.path().join("absent.jsonl"), StoreBackend::Memory);
        config.report_path = Some(report_path.clone());

        let report = run_ingestion(&config, CancellationToken::new()).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(stages(&report), vec![Stage::Init, Stage::Failed]);
        assert!(report.cause.as_deref().unwrap_or_default().contains("absent.jsonl"));

        assert_eq!(finish(&report, config.report_path.as_deref()), 2);
        let written = std::fs::read_to_string(&report_path).expect("report written");
        assert!(written.contains("Failed"));
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_with_exit_code_2() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.jsonl"), "{\"id\":\"1\"}\n").expect("write");
        let config = config(dir.path().to_path_buf(), StoreBackend::Neo4j);

        let report = run_ingestion(&config, CancellationToken::new()).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(stages(&report), vec![Stage::Init, Stage::Failed]);
        assert_eq!(finish(&report, None), 2);
    }

    #[tokio::test]
    async fn test_memory_backend_completes() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("a.jsonl"),
            "{\"record_type\":\"compound\",\"chembl_id\":\"CHEMBL25\",\"name\":\"Aspirin\"}\n",
        )
        .expect("write");
        let config = config(dir.path().to_path_buf(), StoreBackend::Memory);

        let report = run_ingestion(&config, CancellationToken::new()).await;
        assert!(report.is_completed(), "{report}");
        assert_eq!(finish(&report, None), 0);
    }

    #[test]
    fn test_configuration_error_is_a_failed_report() {
        let report = setup_failed(false, "Configuration error", &anyhow::anyhow!("SOURCE_PATH is required"));
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.cause.as_deref(), Some("Configuration error: SOURCE_PATH is required"));
    }
}
