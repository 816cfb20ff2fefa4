//! Extractor over records already held in memory.

use futures::stream;

use super::{Extractor, RecordStream, SourceRecord};
use crate::errors::ExtractionError;

/// Replays a fixed sequence of records (and per-record errors) on every `open`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExtractor {
    name: String,
    items: Vec<Result<SourceRecord, ExtractionError>>,
    unreadable: Option<String>,
}

impl InMemoryExtractor {
    pub fn new(name: impl Into<String>, records: Vec<SourceRecord>) -> Self {
        Self {
            name: name.into(),
            items: records.into_iter().map(Ok).collect(),
            unreadable: None,
        }
    }

    /// Append a per-record error to the sequence.
    pub fn with_error(mut self, error: ExtractionError) -> Self {
        self.items.push(Err(error));
        self
    }

    /// Make `open` fail with [`ExtractionError::Unreadable`].
    pub fn unreadable(mut self, reason: impl Into<String>) -> Self {
        self.unreadable = Some(reason.into());
        self
    }
}

impl Extractor for InMemoryExtractor {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<RecordStream, ExtractionError> {
        if let Some(reason) = &self.unreadable {
            return Err(ExtractionError::Unreadable {
                source_name: self.name.clone(),
                reason: reason.clone(),
            });
        }
        Ok(Box::pin(stream::iter(self.items.clone())))
    }
}
