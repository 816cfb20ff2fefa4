//! Source boundary: the record envelope and the extractor capability.
//!
//! Every source is consumed through [`Extractor`], which yields a stream of
//! [`SourceRecord`]s. Concrete scrapers live outside this crate; the bundled
//! [`jsonl::JsonLinesExtractor`] reads their dumps.

pub mod checkpoint;
pub mod jsonl;
pub mod memory;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ExtractionError;
use crate::nodes::Provenance;

pub use checkpoint::Checkpoint;
pub use jsonl::{JsonLinesConfig, JsonLinesExtractor};
pub use memory::InMemoryExtractor;

/// Undecoded record body as the source delivered it.
pub type RawPayload = serde_json::Map<String, serde_json::Value>;

/// Stream of records from one `open` call. Item errors are per record unless
/// [`ExtractionError::is_fatal`] says otherwise.
pub type RecordStream = BoxStream<'static, Result<SourceRecord, ExtractionError>>;

/// One record as fetched from a source. Never mutated after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source: String,
    pub origin_id: String,
    pub payload: RawPayload,
    pub fetched_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn record_ref(&self) -> RecordRef {
        RecordRef {
            source: self.source.clone(),
            origin_id: self.origin_id.clone(),
        }
    }

    pub fn provenance(&self) -> Provenance {
        Provenance {
            source: self.source.clone(),
            origin_id: self.origin_id.clone(),
            fetched_at: self.fetched_at,
        }
    }
}

/// Printable reference to a source record, `source:origin_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    pub source: String,
    pub origin_id: String,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.origin_id)
    }
}

/// A source of records.
///
/// `open` failing means the source cannot be read at all and is fatal to the
/// run. Calling `open` again restarts the sequence from the beginning.
pub trait Extractor: Send + Sync {
    fn source_name(&self) -> &str;

    fn open(&self) -> Result<RecordStream, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_ref_display() {
        let record = SourceRecord {
            source: "fda".into(),
            origin_id: "320-21-0042".into(),
            payload: RawPayload::new(),
            fetched_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        };
        assert_eq!(record.record_ref().to_string(), "fda:320-21-0042");
        assert_eq!(record.provenance().record_ref(), "fda:320-21-0042");
    }
}
