//! Run report: per-stage counters, failed records, merges and load summary.
//!
//! Accumulated by a [`RunReportBuilder`] owned by the orchestrator, then
//! frozen into a [`RunReport`] when the run ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::Result;
use crate::identity::MergeRecord;
use crate::loader::LoadSummary;
use crate::utils::write_json_atomic;

/// Orchestrator state. The last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Init,
    Extracting,
    Transforming,
    Resolving,
    Validating,
    Loading,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "Init",
            Stage::Extracting => "Extracting",
            Stage::Transforming => "Transforming",
            Stage::Resolving => "Resolving",
            Stage::Validating => "Validating",
            Stage::Loading => "Loading",
            Stage::Completed => "Completed",
            Stage::Failed => "Failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounters {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// A record (or derived item) that did not make it into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub stage: Stage,
    /// Record reference, canonical ID or relationship description.
    pub record_ref: String,
    /// Source records that contributed to the item.
    pub origins: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub cause: Option<String>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub transitions: Vec<StageTransition>,
    pub stage_stats: BTreeMap<Stage, StageCounters>,
    pub failed_records: Vec<FailedRecord>,
    pub merges: Vec<MergeRecord>,
    pub load: LoadSummary,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_records.is_empty()
    }

    /// `0` completed cleanly, `1` completed with recoverable failures, `2` failed.
    pub fn exit_code(&self) -> i32 {
        match (self.status, self.has_failures()) {
            (RunStatus::Failed, _) => 2,
            (RunStatus::Completed, true) => 1,
            (RunStatus::Completed, false) => 0,
        }
    }

    pub fn stats(&self, stage: Stage) -> StageCounters {
        self.stage_stats.get(&stage).copied().unwrap_or_default()
    }

    pub fn failures_in(&self, stage: Stage) -> impl Iterator<Item = &FailedRecord> {
        self.failed_records.iter().filter(move |f| f.stage == stage)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON, replacing `path` atomically.
    pub fn persist(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        info!(path = %path.display(), run_id = %self.run_id, "run report written");
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "FAILED",
        };
        write!(f, "run {} {status} in {} ms", self.run_id, self.duration_ms)?;
        if self.dry_run {
            f.write_str(" (dry run)")?;
        }
        writeln!(f)?;
        if let Some(cause) = &self.cause {
            writeln!(f, "  cause: {cause}")?;
        }
        for (stage, c) in &self.stage_stats {
            writeln!(
                f,
                "  {:<13} processed {:>6}  ok {:>6}  failed {:>5}  skipped {:>5}",
                stage.as_str(),
                c.processed,
                c.succeeded,
                c.failed,
                c.skipped
            )?;
        }
        if self.dry_run {
            for (label, n) in &self.load.planned_nodes {
                writeln!(f, "  would write {n} {label} node(s)")?;
            }
            for (rel_type, n) in &self.load.planned_relationships {
                writeln!(f, "  would write {n} {rel_type} relationship(s)")?;
            }
        } else {
            writeln!(
                f,
                "  written: {} node(s), {} relationship(s), {} dangling, {}/{} batch(es) failed",
                self.load.nodes_written,
                self.load.relationships_written,
                self.load.dangling,
                self.load.failed_batches,
                self.load.batches
            )?;
        }
        writeln!(f, "  merges: {}", self.merges.len())?;
        write!(f, "  failed records: {}", self.failed_records.len())
    }
}

/// Mutable accumulator for one run.
#[derive(Debug)]
pub struct RunReportBuilder {
    run_id: Uuid,
    dry_run: bool,
    started_at: DateTime<Utc>,
    stage: Stage,
    transitions: Vec<StageTransition>,
    stage_stats: BTreeMap<Stage, StageCounters>,
    failed_records: Vec<FailedRecord>,
    merges: Vec<MergeRecord>,
    load: LoadSummary,
}

impl RunReportBuilder {
    pub fn new(dry_run: bool) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            dry_run,
            started_at,
            stage: Stage::Init,
            transitions: vec![StageTransition {
                stage: Stage::Init,
                at: started_at,
            }],
            stage_stats: BTreeMap::new(),
            failed_records: Vec::new(),
            merges: Vec::new(),
            load: LoadSummary::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Whether the run got as far as `stage`.
    pub fn reached(&self, stage: Stage) -> bool {
        self.transitions.iter().any(|t| t.stage == stage)
    }

    pub fn enter(&mut self, stage: Stage) {
        info!(run_id = %self.run_id, from = %self.stage, to = %stage, "stage transition");
        self.stage = stage;
        self.transitions.push(StageTransition { stage, at: Utc::now() });
        self.stage_stats.entry(stage).or_default();
    }

    pub fn counters(&mut self, stage: Stage) -> &mut StageCounters {
        self.stage_stats.entry(stage).or_default()
    }

    pub fn record_failure(
        &mut self,
        stage: Stage,
        record_ref: impl Into<String>,
        origins: Vec<String>,
        error: impl fmt::Display,
    ) {
        self.failed_records.push(FailedRecord {
            stage,
            record_ref: record_ref.into(),
            origins,
            error: error.to_string(),
        });
    }

    pub fn failed_records(&self) -> &[FailedRecord] {
        &self.failed_records
    }

    pub fn set_merges(&mut self, merges: Vec<MergeRecord>) {
        self.merges = merges;
    }

    pub fn set_load(&mut self, load: LoadSummary) {
        self.load = load;
    }

    pub fn complete(self) -> RunReport {
        self.finish(RunStatus::Completed, None)
    }

    pub fn fail(self, cause: impl Into<String>) -> RunReport {
        self.finish(RunStatus::Failed, Some(cause.into()))
    }

    fn finish(mut self, status: RunStatus, cause: Option<String>) -> RunReport {
        let terminal = match status {
            RunStatus::Completed => Stage::Completed,
            RunStatus::Failed => Stage::Failed,
        };
        self.enter(terminal);

        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
        self.failed_records
            .sort_by(|a, b| (a.stage, &a.record_ref, &a.error).cmp(&(b.stage, &b.record_ref, &b.error)));

        match &cause {
            Some(cause) => error!(run_id = %self.run_id, cause = %cause, duration_ms, "run failed"),
            None => info!(
                run_id = %self.run_id,
                duration_ms,
                failed_records = self.failed_records.len(),
                merges = self.merges.len(),
                "run completed"
            ),
        }

        RunReport {
            run_id: self.run_id,
            status,
            cause,
            dry_run: self.dry_run,
            started_at: self.started_at,
            finished_at,
            duration_ms,
            transitions: self.transitions,
            stage_stats: self.stage_stats,
            failed_records: self.failed_records,
            merges: self.merges,
            load: self.load,
        }
    }
}
