//! Static per-source priority table used to break field conflicts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Priority of any source not named in the table.
pub const DEFAULT_SOURCE_PRIORITY: u32 = 50;

/// Higher priority wins a conflicting non-placeholder field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePriorities(BTreeMap<String, u32>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid source priority entry '{0}', expected name=priority")]
pub struct InvalidPriorityEntry(pub String);

impl SourcePriorities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl Into<String>, priority: u32) -> Self {
        self.0.insert(source.into(), priority);
        self
    }

    pub fn priority(&self, source: &str) -> u32 {
        self.0.get(source).copied().unwrap_or(DEFAULT_SOURCE_PRIORITY)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for SourcePriorities {
    type Err = InvalidPriorityEntry;

    /// Parse `fda=90,chembl=80`. Empty entries are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut table = SourcePriorities::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, priority) = entry
                .split_once('=')
                .ok_or_else(|| InvalidPriorityEntry(entry.to_string()))?;
            let name = name.trim();
            let priority = priority
                .trim()
                .parse::<u32>()
                .map_err(|_| InvalidPriorityEntry(entry.to_string()))?;
            if name.is_empty() {
                return Err(InvalidPriorityEntry(entry.to_string()));
            }
            table = table.with(name, priority);
        }
        Ok(table)
    }
}
