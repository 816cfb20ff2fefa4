#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::stream;
use serde_json::Value;
use tempfile::TempDir;

use pharmagraph::driver::{GraphStore, InMemoryGraphStore, Predicate, WriteSummary};
use pharmagraph::edges::{RelationshipType, ResolvedRelationship};
use pharmagraph::errors::{ExtractionError, StoreError};
use pharmagraph::nodes::{Label, StagedNode};
use pharmagraph::source::{Extractor, InMemoryExtractor, RecordStream, SourceRecord};
use pharmagraph::PipelineConfig;

pub fn fetched_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn record(source: &str, origin: &str, payload: Value) -> SourceRecord {
    SourceRecord {
        source: source.to_string(),
        origin_id: origin.to_string(),
        payload: payload.as_object().cloned().expect("payload must be an object"),
        fetched_at: fetched_at(),
    }
}

pub fn extractor(source: &str, records: Vec<SourceRecord>) -> Box<dyn Extractor> {
    Box::new(InMemoryExtractor::new(source, records))
}

/// Defaults with millisecond retry delays and small batches.
pub fn config() -> PipelineConfig {
    PipelineConfig {
        batch_size: 10,
        max_retries: 2,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..PipelineConfig::default()
    }
}

/// In-memory store whose first `failures` write calls fail transiently.
pub struct FlakyStore {
    pub inner: InMemoryGraphStore,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryGraphStore::new(),
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Never recovers.
    pub fn always_failing() -> Self {
        Self::new(usize::MAX)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail_now(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl GraphStore for FlakyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn write_nodes(&self, nodes: &[StagedNode]) -> Result<WriteSummary, StoreError> {
        if self.fail_now() {
            return Err(StoreError::transient("write_nodes", "connection reset by peer"));
        }
        self.inner.write_nodes(nodes).await
    }

    async fn write_relationships(
        &self,
        relationships: &[ResolvedRelationship],
    ) -> Result<WriteSummary, StoreError> {
        if self.fail_now() {
            return Err(StoreError::transient("write_relationships", "connection reset by peer"));
        }
        self.inner.write_relationships(relationships).await
    }

    async fn count_nodes(&self, label: Option<Label>, filter: &[Predicate]) -> Result<u64, StoreError> {
        self.inner.count_nodes(label, filter).await
    }

    async fn count_relationships(&self, rel_type: Option<RelationshipType>) -> Result<u64, StoreError> {
        self.inner.count_relationships(rel_type).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

/// In-memory store whose node writes take `delay` before they commit.
pub struct SlowStore {
    pub inner: InMemoryGraphStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryGraphStore::new(),
            delay,
        }
    }
}

impl GraphStore for SlowStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn write_nodes(&self, nodes: &[StagedNode]) -> Result<WriteSummary, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.write_nodes(nodes).await
    }

    async fn write_relationships(
        &self,
        relationships: &[ResolvedRelationship],
    ) -> Result<WriteSummary, StoreError> {
        self.inner.write_relationships(relationships).await
    }

    async fn count_nodes(&self, label: Option<Label>, filter: &[Predicate]) -> Result<u64, StoreError> {
        self.inner.count_nodes(label, filter).await
    }

    async fn count_relationships(&self, rel_type: Option<RelationshipType>) -> Result<u64, StoreError> {
        self.inner.count_relationships(rel_type).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

/// A source whose stream never yields.
pub struct StalledExtractor;

impl Extractor for StalledExtractor {
    fn source_name(&self) -> &str {
        "stalled"
    }

    fn open(&self) -> Result<RecordStream, ExtractionError> {
        Ok(Box::pin(stream::pending()))
    }
}

/// Temporary directory of JSON-lines dumps.
pub struct TempSource {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TempSource {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp source dir");
        let path = dir.path().to_path_buf();
        Self { dir, path }
    }

    /// Write one JSON value per line to `rel`.
    pub fn write_jsonl(&self, rel: &str, lines: &[Value]) -> &Self {
        let full = self.path.join(rel);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        let body: Vec<String> = lines.iter().map(Value::to_string).collect();
        std::fs::write(&full, body.join("\n")).expect("write test file");
        self
    }
}
