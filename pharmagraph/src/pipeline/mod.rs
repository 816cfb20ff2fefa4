//! Pipeline orchestrator.
//!
//! Drives one run through the stages in order:
//! 1. **Extracting**: open every source and stream records into a bounded channel
//! 2. **Transforming**: map records to staged nodes/relationships on blocking workers
//! 3. **Resolving**: merge staged items into canonical nodes
//! 4. **Validating**: apply the quality rule tables
//! 5. **Loading**: batch upserts into the graph store
//!
//! Per-record problems are recorded in the [`RunReport`] and never stop the
//! run. The run fails on an unreadable source, an unreachable store,
//! cancellation, the optional run timeout, or (strict mode) any validation or
//! load failure. The store handle is closed at the end of every run.

pub mod report;

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::GraphStore;
use crate::errors::{ExtractionError, PipelineError, Result, TransformError};
use crate::identity::IdentityResolver;
use crate::loader::{BatchLoader, LoaderConfig};
use crate::quality::QualityChecker;
use crate::source::{Checkpoint, Extractor, RecordRef, SourceRecord};
use crate::transform::{TransformOutput, Transformer};
use crate::types::PipelineConfig;

pub use report::{FailedRecord, RunReport, RunReportBuilder, RunStatus, Stage, StageCounters, StageTransition};

/// Outcome of one record after the transform workers.
enum Transformed {
    Output(RecordRef, TransformOutput),
    Failed(RecordRef, TransformError),
    Unextracted(ExtractionError),
    Skipped(RecordRef),
}

pub struct Pipeline<T: Transformer> {
    config: PipelineConfig,
    transformer: Arc<T>,
    checker: QualityChecker,
    cancel: CancellationToken,
}

impl<T: Transformer + 'static> Pipeline<T> {
    /// Validate `config` and build a pipeline with the default rule table.
    pub fn new(config: PipelineConfig, transformer: T) -> Result<Self> {
        config.check()?;
        Ok(Self {
            config,
            transformer: Arc::new(transformer),
            checker: QualityChecker::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_checker(mut self, checker: QualityChecker) -> Self {
        self.checker = checker;
        self
    }

    /// Use an externally owned token, e.g. one cancelled by a signal handler.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run against `store` and return its report. Never panics on
    /// stage errors; they become a `Failed` report with a cause.
    pub async fn run<S: GraphStore>(&self, extractors: &[Box<dyn Extractor>], store: &S) -> RunReport {
        let mut report = RunReportBuilder::new(self.config.dry_run);
        info!(
            run_id = %report.run_id(),
            sources = extractors.len(),
            dry_run = self.config.dry_run,
            strict = self.config.strict,
            "pipeline run starting"
        );

        // The timeout cancels this run's token, so in-flight batches finish
        // the same way they do on an external cancel.
        let run_cancel = self.cancel.child_token();
        let mut timed_out = false;
        let result = {
            let mut execute = std::pin::pin!(self.execute(extractors, store, &run_cancel, &mut report));
            match self.config.run_timeout() {
                Some(limit) => tokio::select! {
                    result = &mut execute => result,
                    _ = tokio::time::sleep(limit) => {
                        warn!(timeout_secs = limit.as_secs(), "run timed out, cancelling");
                        timed_out = true;
                        run_cancel.cancel();
                        execute.await
                    }
                },
                None => execute.await,
            }
        };
        let result = match result {
            _ if timed_out => Err("run timed out".to_string()),
            Ok(()) => Ok(()),
            Err(e) => Err(cause_of(&e)),
        };

        if let Err(e) = store.close().await {
            warn!(error = %e, "failed to close store");
        }

        match result {
            Ok(()) => report.complete(),
            Err(cause) => report.fail(cause),
        }
    }

    async fn execute<S: GraphStore>(
        &self,
        extractors: &[Box<dyn Extractor>],
        store: &S,
        cancel: &CancellationToken,
        report: &mut RunReportBuilder,
    ) -> Result<()> {
        let mut checkpoint = match &self.config.checkpoint_path {
            Some(path) => {
                let checkpoint = Checkpoint::load(path)?;
                info!(path = %path.display(), completed = checkpoint.len(), "checkpoint loaded");
                Some(checkpoint)
            }
            None => None,
        };

        let resolver = IdentityResolver::new(self.config.source_priorities.clone());
        let transformed = self
            .extract_and_transform(extractors, checkpoint.as_ref(), &resolver, cancel, report)
            .await?;
        ensure_not_cancelled(cancel)?;

        // ── Resolving ──
        report.enter(Stage::Resolving);
        let resolution = resolver.finish();
        {
            let succeeded = resolution.nodes.len() + resolution.relationships.len();
            let failed = resolution.unresolved.len() + resolution.collisions.len();
            let counters = report.counters(Stage::Resolving);
            counters.processed = succeeded + failed + resolution.dropped_relationships;
            counters.succeeded = succeeded;
            counters.failed = failed;
            counters.skipped = resolution.dropped_relationships;
        }
        for unresolved in &resolution.unresolved {
            report.record_failure(
                Stage::Resolving,
                format!("{} -> {}", unresolved.rel_type, unresolved.reference),
                unresolved.origins.clone(),
                format!("{} endpoint {} matches no node", unresolved.rel_type, unresolved.reference),
            );
        }
        for collision in &resolution.collisions {
            let shared = resolution
                .collisions
                .iter()
                .filter(|c| c.canonical_id == collision.canonical_id)
                .count();
            report.record_failure(
                Stage::Resolving,
                collision.canonical_id.to_string(),
                collision.origins.clone(),
                format!(
                    "canonical id {} is shared by {} distinct fingerprints",
                    collision.canonical_id, shared
                ),
            );
        }
        info!(
            nodes = resolution.nodes.len(),
            relationships = resolution.relationships.len(),
            merges = resolution.merges.len(),
            unresolved = resolution.unresolved.len(),
            collisions = resolution.collisions.len(),
            "identity resolution finished"
        );
        report.set_merges(resolution.merges);
        ensure_not_cancelled(cancel)?;

        // ── Validating ──
        report.enter(Stage::Validating);
        let validated = self.checker.partition(resolution.nodes, resolution.relationships);
        {
            let accepted = validated.nodes.len() + validated.relationships.len();
            let rejected = validated.rejected_nodes.len() + validated.rejected_relationships.len();
            let counters = report.counters(Stage::Validating);
            counters.processed = accepted + rejected + validated.cascaded.len();
            counters.succeeded = accepted;
            counters.failed = rejected;
            counters.skipped = validated.cascaded.len();
        }
        for (node, violations) in &validated.rejected_nodes {
            let dropped = validated
                .cascaded
                .iter()
                .filter(|r| r.from == node.canonical_id || r.to == node.canonical_id)
                .count();
            let mut error = join_violations(violations);
            if dropped > 0 {
                error.push_str(&format!("; {dropped} relationship(s) dropped with it"));
            }
            report.record_failure(Stage::Validating, node.canonical_id.to_string(), node.origins(), error);
        }
        for (rel, violations) in &validated.rejected_relationships {
            report.record_failure(Stage::Validating, rel.describe(), rel.origins(), join_violations(violations));
        }
        if self.config.strict && validated.has_rejections() {
            let rejected = validated.rejected_nodes.len() + validated.rejected_relationships.len();
            return Err(PipelineError::Strict(format!("{rejected} item(s) failed validation")));
        }
        ensure_not_cancelled(cancel)?;

        // ── Loading ──
        report.enter(Stage::Loading);
        let loader = BatchLoader::new(store, LoaderConfig::from(&self.config), cancel.clone());
        loader.preflight().await?;
        let planned = validated.nodes.len() + validated.relationships.len();
        let cascaded = validated.cascaded;
        let outcome = loader.load(validated.nodes, validated.relationships).await;
        {
            let summary = &outcome.summary;
            let counters = report.counters(Stage::Loading);
            counters.processed = planned;
            counters.succeeded = summary.nodes_written + summary.relationships_written;
            counters.failed = outcome.failures.len();
            counters.skipped = summary.dangling + outcome.skipped_origins.len();
        }
        for failure in &outcome.failures {
            report.record_failure(Stage::Loading, failure.item.clone(), failure.origins.clone(), &failure.error);
        }
        report.set_load(outcome.summary.clone());

        if let (Some(checkpoint), Some(path)) = (checkpoint.as_mut(), &self.config.checkpoint_path) {
            if !self.config.dry_run {
                let mut unwritten: BTreeSet<&str> = report
                    .failed_records()
                    .iter()
                    .flat_map(|f| f.origins.iter().map(String::as_str))
                    .collect();
                unwritten.extend(outcome.skipped_origins.iter().map(String::as_str));
                let cascaded_origins: Vec<String> = cascaded.iter().flat_map(|r| r.origins()).collect();
                unwritten.extend(cascaded_origins.iter().map(String::as_str));

                let mut marked = 0;
                for key in transformed.iter().filter(|k| !unwritten.contains(k.as_str())) {
                    if checkpoint.mark(key.clone()) {
                        marked += 1;
                    }
                }
                checkpoint.metadata.push(serde_json::json!({
                    "run_id": report.run_id().to_string(),
                    "records_completed": marked,
                    "failed_records": report.failed_records().len(),
                }));
                checkpoint.save(path)?;
                info!(marked, total = checkpoint.len(), "checkpoint updated");
            }
        }

        ensure_not_cancelled(cancel)?;
        if self.config.strict && !outcome.failures.is_empty() {
            return Err(PipelineError::Strict(format!(
                "{} item(s) could not be written",
                outcome.failures.len()
            )));
        }
        Ok(())
    }

    /// Stream every source through the transformer into `resolver`.
    /// Returns the record keys that transformed successfully.
    async fn extract_and_transform(
        &self,
        extractors: &[Box<dyn Extractor>],
        checkpoint: Option<&Checkpoint>,
        resolver: &IdentityResolver,
        cancel: &CancellationToken,
        report: &mut RunReportBuilder,
    ) -> Result<BTreeSet<String>> {
        report.enter(Stage::Extracting);
        let mut streams = Vec::with_capacity(extractors.len());
        for extractor in extractors {
            debug!(source = extractor.source_name(), "opening source");
            streams.push(extractor.open()?);
        }

        let (tx, mut rx) = mpsc::channel(self.config.queue_capacity);
        let producer_cancel = cancel.child_token();
        // Stops the producer if this future is dropped before the stream ends.
        let _producer_guard = producer_cancel.clone().drop_guard();
        tokio::spawn(async move {
            for mut records in streams {
                loop {
                    let item = tokio::select! {
                        _ = producer_cancel.cancelled() => return,
                        item = records.next() => item,
                    };
                    let Some(item) = item else { break };
                    let fatal = matches!(&item, Err(e) if e.is_fatal());
                    if tx.send(item).await.is_err() || fatal {
                        return;
                    }
                }
            }
        });

        report.enter(Stage::Transforming);
        let transformer = &self.transformer;
        let events = stream::poll_fn(move |cx| rx.poll_recv(cx))
            .map(move |item: std::result::Result<SourceRecord, ExtractionError>| {
                let transformer = Arc::clone(transformer);
                async move {
                    let record = match item {
                        Ok(record) => record,
                        Err(e) => return Transformed::Unextracted(e),
                    };
                    let record_ref = record.record_ref();
                    if checkpoint.is_some_and(|c| c.contains(&record_ref.to_string())) {
                        return Transformed::Skipped(record_ref);
                    }
                    let result = tokio::task::spawn_blocking(move || transformer.transform(&record))
                        .await
                        .unwrap_or_else(|e| {
                            Err(TransformError::malformed("record", format!("transform task failed: {e}")))
                        });
                    match result {
                        Ok(output) => Transformed::Output(record_ref, output),
                        Err(e) => Transformed::Failed(record_ref, e),
                    }
                }
            })
            .buffer_unordered(self.config.transform_workers);
        let mut events = std::pin::pin!(events);

        let mut transformed = BTreeSet::new();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                event = events.next() => event,
            };
            let Some(event) = event else { break };

            match event {
                Transformed::Unextracted(e) if e.is_fatal() => return Err(e.into()),
                Transformed::Unextracted(e) => {
                    let counters = report.counters(Stage::Extracting);
                    counters.processed += 1;
                    counters.failed += 1;
                    let record = match &e {
                        ExtractionError::Malformed { record, .. } => record.clone(),
                        ExtractionError::Unreadable { source_name, .. } => source_name.clone(),
                    };
                    warn!(record = %record, error = %e, "record could not be extracted");
                    report.record_failure(Stage::Extracting, record.clone(), vec![record], &e);
                }
                Transformed::Skipped(record_ref) => {
                    let counters = report.counters(Stage::Extracting);
                    counters.processed += 1;
                    counters.skipped += 1;
                    debug!(record = %record_ref, "already in checkpoint, skipped");
                }
                Transformed::Failed(record_ref, e) => {
                    self.count_extracted(report);
                    let counters = report.counters(Stage::Transforming);
                    counters.processed += 1;
                    counters.failed += 1;
                    debug!(record = %record_ref, error = %e, "record failed to transform");
                    let key = record_ref.to_string();
                    report.record_failure(Stage::Transforming, key.clone(), vec![key], &e);
                }
                Transformed::Output(record_ref, output) => {
                    self.count_extracted(report);
                    let counters = report.counters(Stage::Transforming);
                    counters.processed += 1;
                    counters.succeeded += 1;
                    resolver.ingest(output);
                    transformed.insert(record_ref.to_string());
                }
            }
        }

        let extracted = report.counters(Stage::Extracting);
        info!(
            processed = extracted.processed,
            failed = extracted.failed,
            skipped = extracted.skipped,
            transformed = transformed.len(),
            "extraction and transformation finished"
        );
        Ok(transformed)
    }

    fn count_extracted(&self, report: &mut RunReportBuilder) {
        let counters = report.counters(Stage::Extracting);
        counters.processed += 1;
        counters.succeeded += 1;
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

fn cause_of(error: &PipelineError) -> String {
    match error {
        PipelineError::Cancelled => "cancelled".to_string(),
        other => other.to_string(),
    }
}

fn join_violations(violations: &[crate::quality::Violation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::InMemoryGraphStore;
    use crate::source::InMemoryExtractor;
    use crate::transform::PharmaTransformer;
    use chrono::Utc;
    use serde_json::json;

    fn record(origin: &str, payload: serde_json::Value) -> SourceRecord {
        SourceRecord {
            source: "fda".into(),
            origin_id: origin.into(),
            payload: payload.as_object().cloned().unwrap_or_default(),
            fetched_at: Utc::now(),
        }
    }

    fn compound(origin: &str, name: &str) -> SourceRecord {
        record(origin, json!({"record_type": "compound", "chembl_id": origin, "name": name}))
    }

    #[tokio::test]
    async fn test_run_completes_and_closes_store() {
        let store = InMemoryGraphStore::new();
        let extractors: Vec<Box<dyn Extractor>> = vec![Box::new(InMemoryExtractor::new(
            "fda",
            vec![compound("CHEMBL25", "Aspirin"), compound("CHEMBL1", "Ibuprofen")],
        ))];
        let pipeline = Pipeline::new(PipelineConfig::default(), PharmaTransformer::new()).expect("valid config");

        let report = pipeline.run(&extractors, &store).await;

        assert_eq!(report.status, RunStatus::Completed, "{report}");
        assert_eq!(report.exit_code(), 0);
        assert_eq!(store.node_count(), 2);
        assert!(store.is_closed());
        assert_eq!(report.stats(Stage::Extracting).succeeded, 2);
        assert_eq!(report.stats(Stage::Transforming).succeeded, 2);
    }

    #[tokio::test]
    async fn test_transform_failure_is_recorded_not_fatal() {
        let store = InMemoryGraphStore::new();
        let extractors: Vec<Box<dyn Extractor>> = vec![Box::new(InMemoryExtractor::new(
            "fda",
            vec![
                compound("CHEMBL25", "Aspirin"),
                record("x", json!({"record_type": "target", "name": "no accession"})),
            ],
        ))];
        let pipeline = Pipeline::new(PipelineConfig::default(), PharmaTransformer::new()).expect("valid config");

        let report = pipeline.run(&extractors, &store).await;

        assert!(report.is_completed());
        assert_eq!(report.exit_code(), 1);
        let failures: Vec<_> = report.failures_in(Stage::Transforming).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].record_ref, "fda:x");
        assert_eq!(store.node_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            Pipeline::new(config, PharmaTransformer::new()),
            Err(PipelineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_source_fails_run() {
        let store = InMemoryGraphStore::new();
        let extractors: Vec<Box<dyn Extractor>> =
            vec![Box::new(InMemoryExtractor::new("fda", Vec::new()).unreadable("permission denied"))];
        let pipeline = Pipeline::new(PipelineConfig::default(), PharmaTransformer::new()).expect("valid config");

        let report = pipeline.run(&extractors, &store).await;

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.cause.as_deref().unwrap_or_default().contains("permission denied"));
        assert!(store.is_closed());
        assert_eq!(store.write_calls(), 0);
    }
}
