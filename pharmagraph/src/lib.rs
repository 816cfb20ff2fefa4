//! # pharmagraph
//!
//! Extract → transform → resolve → validate → load pipeline that turns
//! heterogeneous pharmaceutical source records into a property graph.
//!
//! ## Architecture
//!
//! - **Sources**: every source is an [`source::Extractor`] yielding [`source::SourceRecord`]s
//! - **Transform**: typed payload decoding into staged nodes and relationships
//! - **Identity**: content fingerprints, deterministic canonical IDs, order-independent merging
//! - **Quality**: per-label rule tables; failing items are reported, never written
//! - **Load**: batched, retried, idempotent upserts through a [`driver::GraphStore`]
//!
//! Re-running the same input never creates duplicates: nodes merge by
//! canonical ID and relationships by `(type, from, to)`.

pub mod edges;
pub mod errors;
pub mod nodes;
pub mod types;

pub mod driver;
pub mod identity;
pub mod loader;
pub mod quality;
pub mod source;
pub mod transform;

pub mod pipeline;
pub mod utils;

pub use driver::{GraphStore, InMemoryGraphStore};
pub use errors::{ExtractionError, PipelineError, Result, StoreError, TransformError};
pub use pipeline::{Pipeline, RunReport, RunStatus, Stage};
pub use types::{PipelineConfig, StoreConfig};
