//! Batch loader.
//!
//! Splits validated nodes and relationships into [`LoadBatch`]es (one label
//! or relationship type per batch, at most `batch_size` items), then writes
//! them through a [`GraphStore`]: all node batches first, then relationship
//! batches, each phase with up to `load_concurrency` batches in flight. Every
//! batch is one store transaction and the unit of retry. A batch rejected by a
//! store constraint is rewritten one item at a time, so only the offending
//! items fail.

pub mod retry;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::{GraphStore, WriteSummary};
use crate::edges::{RelationshipType, ResolvedRelationship};
use crate::errors::StoreError;
use crate::nodes::{Label, StagedNode};
use crate::types::PipelineConfig;

pub use retry::{with_retry, Attempted, RetryPolicy};

/// Loader settings, derived from [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub load_concurrency: usize,
    pub write_timeout: Duration,
    pub connect_timeout: Duration,
    pub dry_run: bool,
    /// Stop scheduling batches after the first failed one.
    pub halt_on_failure: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for LoaderConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
            },
            load_concurrency: config.load_concurrency.max(1),
            write_timeout: config.store.write_timeout(),
            connect_timeout: config.store.connect_timeout(),
            dry_run: config.dry_run,
            halt_on_failure: config.strict,
        }
    }
}

// ── Batches ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum BatchItems {
    Nodes(Vec<StagedNode>),
    Relationships(Vec<ResolvedRelationship>),
}

/// One store transaction worth of items.
#[derive(Debug, Clone)]
pub struct LoadBatch {
    pub index: usize,
    pub items: BatchItems,
}

impl LoadBatch {
    pub fn len(&self) -> usize {
        match &self.items {
            BatchItems::Nodes(nodes) => nodes.len(),
            BatchItems::Relationships(rels) => rels.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn operation(&self) -> &'static str {
        match &self.items {
            BatchItems::Nodes(_) => "write_nodes",
            BatchItems::Relationships(_) => "write_relationships",
        }
    }

    /// `(item reference, contributing record references)` per item.
    fn item_refs(&self) -> Vec<(String, Vec<String>)> {
        match &self.items {
            BatchItems::Nodes(nodes) => nodes
                .iter()
                .map(|n| (n.canonical_id.to_string(), n.origins()))
                .collect(),
            BatchItems::Relationships(rels) => rels.iter().map(|r| (r.describe(), r.origins())).collect(),
        }
    }
}

/// Group by label (or type) and chunk. Indices continue across both lists.
pub fn plan_batches(
    nodes: Vec<StagedNode>,
    relationships: Vec<ResolvedRelationship>,
    batch_size: usize,
) -> (Vec<LoadBatch>, Vec<LoadBatch>) {
    let batch_size = batch_size.max(1);

    let mut by_label: BTreeMap<Label, Vec<StagedNode>> = BTreeMap::new();
    for node in nodes {
        by_label.entry(node.label).or_default().push(node);
    }
    let mut by_type: BTreeMap<RelationshipType, Vec<ResolvedRelationship>> = BTreeMap::new();
    for rel in relationships {
        by_type.entry(rel.rel_type).or_default().push(rel);
    }

    let mut index = 0;
    let mut node_batches = Vec::new();
    for group in by_label.into_values() {
        for chunk in group.chunks(batch_size) {
            node_batches.push(LoadBatch {
                index,
                items: BatchItems::Nodes(chunk.to_vec()),
            });
            index += 1;
        }
    }
    let mut rel_batches = Vec::new();
    for group in by_type.into_values() {
        for chunk in group.chunks(batch_size) {
            rel_batches.push(LoadBatch {
                index,
                items: BatchItems::Relationships(chunk.to_vec()),
            });
            index += 1;
        }
    }
    (node_batches, rel_batches)
}

// ── Outcome ──────────────────────────────────────────────────────────────────

/// Counters for the loading stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub nodes_written: usize,
    pub relationships_written: usize,
    /// Relationships skipped because an endpoint is missing from the store.
    pub dangling: usize,
    /// Store transactions, including single-item rewrites.
    pub batches: usize,
    pub failed_batches: usize,
    /// Batches never started because the run was cancelled or halted.
    pub skipped_batches: usize,
    /// Store write attempts across all batches, retries included.
    pub attempts: u32,
    /// Items per label and type this run writes (or would write, in dry-run).
    pub planned_nodes: BTreeMap<Label, usize>,
    pub planned_relationships: BTreeMap<RelationshipType, usize>,
}

/// An item whose batch could not be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    pub item: String,
    pub origins: Vec<String>,
    pub batch: usize,
    pub error: StoreError,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub summary: LoadSummary,
    pub failures: Vec<LoadFailure>,
    /// Record references behind items in skipped batches.
    pub skipped_origins: Vec<String>,
}

enum BatchResult {
    Written {
        batch: LoadBatch,
        summary: WriteSummary,
        attempts: u32,
    },
    Failed {
        batch: LoadBatch,
        error: StoreError,
        attempts: u32,
    },
    Skipped(LoadBatch),
}

// ── Loader ───────────────────────────────────────────────────────────────────

pub struct BatchLoader<'a, S: GraphStore> {
    store: &'a S,
    config: LoaderConfig,
    cancel: CancellationToken,
}

impl<'a, S: GraphStore> BatchLoader<'a, S> {
    pub fn new(store: &'a S, config: LoaderConfig, cancel: CancellationToken) -> Self {
        Self { store, config, cancel }
    }

    /// Ping the store within the connect timeout. Skipped in dry-run.
    pub async fn preflight(&self) -> Result<(), StoreError> {
        if self.config.dry_run {
            return Ok(());
        }
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.store.ping()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation: "ping".to_string(),
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Write everything. Per-batch failures end up in
    /// [`LoadOutcome::failures`]; this never returns early.
    pub async fn load(&self, nodes: Vec<StagedNode>, relationships: Vec<ResolvedRelationship>) -> LoadOutcome {
        let mut outcome = LoadOutcome::default();
        for node in &nodes {
            *outcome.summary.planned_nodes.entry(node.label).or_default() += 1;
        }
        for rel in &relationships {
            *outcome.summary.planned_relationships.entry(rel.rel_type).or_default() += 1;
        }

        let (node_batches, rel_batches) = plan_batches(nodes, relationships, self.config.batch_size);

        if self.config.dry_run {
            info!(
                node_batches = node_batches.len(),
                relationship_batches = rel_batches.len(),
                "dry run, nothing written"
            );
            return outcome;
        }

        let halt = self.cancel.child_token();
        self.run_phase(node_batches, &halt, &mut outcome).await;
        self.run_phase(rel_batches, &halt, &mut outcome).await;

        info!(
            nodes_written = outcome.summary.nodes_written,
            relationships_written = outcome.summary.relationships_written,
            dangling = outcome.summary.dangling,
            failed_batches = outcome.summary.failed_batches,
            skipped_batches = outcome.summary.skipped_batches,
            "load finished"
        );
        outcome
    }

    async fn run_phase(&self, batches: Vec<LoadBatch>, halt: &CancellationToken, outcome: &mut LoadOutcome) {
        let results: Vec<Vec<BatchResult>> = stream::iter(batches)
            .map(move |batch| async move {
                if halt.is_cancelled() {
                    return vec![BatchResult::Skipped(batch)];
                }
                let attempted = self.write_batch(&batch).await;
                let results = match attempted.result {
                    Ok(summary) => vec![BatchResult::Written {
                        batch,
                        summary,
                        attempts: attempted.attempts,
                    }],
                    Err(StoreError::Constraint(reason)) if batch.len() > 1 => {
                        debug!(batch = batch.index, reason = %reason, "constraint violation, writing items one at a time");
                        self.write_items(batch, attempted.attempts).await
                    }
                    Err(error) => vec![BatchResult::Failed {
                        batch,
                        error,
                        attempts: attempted.attempts,
                    }],
                };
                if self.config.halt_on_failure && results.iter().any(|r| matches!(r, BatchResult::Failed { .. })) {
                    halt.cancel();
                }
                results
            })
            .buffer_unordered(self.config.load_concurrency)
            .collect()
            .await;

        for result in results.into_iter().flatten() {
            let summary = &mut outcome.summary;
            match result {
                BatchResult::Written {
                    batch,
                    summary: written,
                    attempts,
                } => {
                    summary.batches += 1;
                    summary.attempts += attempts;
                    summary.dangling += written.dangling;
                    match batch.items {
                        BatchItems::Nodes(_) => summary.nodes_written += written.written,
                        BatchItems::Relationships(_) => summary.relationships_written += written.written,
                    }
                }
                BatchResult::Failed { batch, error, attempts } => {
                    summary.batches += 1;
                    summary.failed_batches += 1;
                    summary.attempts += attempts;
                    warn!(batch = batch.index, items = batch.len(), attempts, error = %error, "batch failed");
                    outcome
                        .failures
                        .extend(batch.item_refs().into_iter().map(|(item, origins)| LoadFailure {
                            item,
                            origins,
                            batch: batch.index,
                            error: error.clone(),
                        }));
                }
                BatchResult::Skipped(batch) => {
                    summary.skipped_batches += 1;
                    debug!(batch = batch.index, "batch skipped");
                    outcome
                        .skipped_origins
                        .extend(batch.item_refs().into_iter().flat_map(|(_, origins)| origins));
                }
            }
        }
    }

    /// Write each item of `batch` in its own transaction.
    async fn write_items(&self, batch: LoadBatch, prior_attempts: u32) -> Vec<BatchResult> {
        let index = batch.index;
        let singles: Vec<LoadBatch> = match batch.items {
            BatchItems::Nodes(nodes) => nodes
                .into_iter()
                .map(|n| LoadBatch {
                    index,
                    items: BatchItems::Nodes(vec![n]),
                })
                .collect(),
            BatchItems::Relationships(rels) => rels
                .into_iter()
                .map(|r| LoadBatch {
                    index,
                    items: BatchItems::Relationships(vec![r]),
                })
                .collect(),
        };

        let mut carried = prior_attempts;
        let mut results = Vec::with_capacity(singles.len());
        for single in singles {
            let attempted = self.write_batch(&single).await;
            let attempts = attempted.attempts + std::mem::take(&mut carried);
            results.push(match attempted.result {
                Ok(summary) => BatchResult::Written {
                    batch: single,
                    summary,
                    attempts,
                },
                Err(error) => BatchResult::Failed {
                    batch: single,
                    error,
                    attempts,
                },
            });
        }
        results
    }

    async fn write_batch(&self, batch: &LoadBatch) -> Attempted<WriteSummary> {
        let operation = batch.operation();
        with_retry(self.config.retry, operation, move || self.write_once(batch)).await
    }

    async fn write_once(&self, batch: &LoadBatch) -> Result<WriteSummary, StoreError> {
        let timeout = self.config.write_timeout;
        let write = async {
            match &batch.items {
                BatchItems::Nodes(nodes) => self.store.write_nodes(nodes).await,
                BatchItems::Relationships(rels) => self.store.write_relationships(rels).await,
            }
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation: batch.operation().to_string(),
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
