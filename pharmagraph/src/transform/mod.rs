//! Record → staged graph items.
//!
//! A [`Transformer`] maps one [`SourceRecord`] to the nodes and relationships
//! it describes. Transformers are pure: the same record always yields the
//! same output. The only time-derived property, `ingested_at`, is copied from
//! the record's `fetched_at` and never takes part in identity.

pub mod payload;
pub mod pharma;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::edges::StagedRelationship;
use crate::errors::TransformError;
use crate::nodes::StagedNode;
use crate::source::{RecordRef, SourceRecord};

pub use payload::{EntityPayload, RecordKind};
pub use pharma::PharmaTransformer;

/// Maximum `title` length in characters; longer titles end in `...`.
pub const TITLE_MAX_CHARS: usize = 500;
/// Maximum stored `full_text` length in characters.
pub const FULL_TEXT_MAX_CHARS: usize = 100000;
/// Length of the `snippet` derived from `full_text`.
pub const SNIPPET_MAX_CHARS: usize = 300;

/// Everything one record produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub nodes: Vec<StagedNode>,
    pub relationships: Vec<StagedRelationship>,
}

impl TransformOutput {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

pub trait Transformer: Send + Sync {
    fn transform(&self, record: &SourceRecord) -> Result<TransformOutput, TransformError>;
}

impl<T: Transformer + ?Sized> Transformer for std::sync::Arc<T> {
    fn transform(&self, record: &SourceRecord) -> Result<TransformOutput, TransformError> {
        (**self).transform(record)
    }
}

/// Result of transforming several records; failures do not stop the batch.
#[derive(Debug, Default)]
pub struct BatchTransform {
    pub outputs: Vec<(RecordRef, TransformOutput)>,
    pub failures: Vec<(RecordRef, TransformError)>,
}

pub fn transform_batch<T: Transformer + ?Sized>(
    transformer: &T,
    records: &[SourceRecord],
) -> BatchTransform {
    let mut batch = BatchTransform::default();
    for record in records {
        match transformer.transform(record) {
            Ok(output) => batch.outputs.push((record.record_ref(), output)),
            Err(e) => {
                debug!(record = %record.record_ref(), error = %e, "transform failed");
                batch.failures.push((record.record_ref(), e));
            }
        }
    }
    batch
}
