//! Resumable-run progress file.
//!
//! Holds the record keys (`source:origin_id`) whose outputs have been fully
//! written, so a rerun can skip them. Rewritten atomically: the new content
//! goes to a temporary file in the same directory, which then replaces the
//! old file by rename.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

use crate::errors::Result;
use crate::utils::write_json_atomic;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub downloaded_ids: BTreeSet<String>,
    /// One entry per run that updated the checkpoint.
    #[serde(default)]
    pub metadata: Vec<serde_json::Value>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Load from `path`. A missing file is an empty checkpoint.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no checkpoint file, starting empty");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.downloaded_ids.contains(key)
    }

    /// Returns `true` if the key was not yet recorded.
    pub fn mark(&mut self, key: impl Into<String>) -> bool {
        self.downloaded_ids.insert(key.into())
    }

    pub fn len(&self) -> usize {
        self.downloaded_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloaded_ids.is_empty()
    }

    /// Stamp `last_updated` and atomically rewrite `path`.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_updated = Some(Utc::now());
        write_json_atomic(path, self)?;
        debug!(path = %path.display(), records = self.len(), "checkpoint saved");
        Ok(())
    }
}
