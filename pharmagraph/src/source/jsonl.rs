//! JSON-lines extractor: one JSON object per line, from a file or a directory.
//!
//! A line whose `payload` field is an object is an envelope:
//!
//! ```json
//! {"source": "fda", "origin_id": "320-21-0042", "fetched_at": "2024-03-01T00:00:00Z", "payload": {…}}
//! ```
//!
//! Any other object is the payload itself; the record then takes the
//! extractor's source name, the payload's `id` as origin ID (or
//! `<file>#<line>` without one) and the file's modification time as
//! `fetched_at`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{Extractor, RawPayload, RecordStream, SourceRecord};
use crate::errors::ExtractionError;
use crate::utils::parse_flexible_datetime;

pub const DEFAULT_PATTERN: &str = "*.jsonl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonLinesConfig {
    /// Source name given to bare-payload records.
    pub source_name: String,
    /// A `.jsonl` file, or a directory of them.
    pub path: PathBuf,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Glob matched against file names inside a directory.
    pub pattern: String,
}

impl JsonLinesConfig {
    pub fn new(source_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_name: source_name.into(),
            path: path.into(),
            recursive: false,
            pattern: DEFAULT_PATTERN.to_string(),
        }
    }
}

pub struct JsonLinesExtractor {
    config: JsonLinesConfig,
}

impl JsonLinesExtractor {
    pub fn new(config: JsonLinesConfig) -> Self {
        Self { config }
    }

    fn unreadable(&self, reason: impl Into<String>) -> ExtractionError {
        ExtractionError::Unreadable {
            source_name: self.config.source_name.clone(),
            reason: reason.into(),
        }
    }

    /// Files to read, sorted by path so every `open` yields the same order.
    fn discover_files(&self) -> Result<(PathBuf, Vec<PathBuf>), ExtractionError> {
        let root = &self.config.path;
        let metadata = std::fs::metadata(root)
            .map_err(|e| self.unreadable(format!("{}: {e}", root.display())))?;

        if metadata.is_file() {
            let base = root.parent().map(Path::to_path_buf).unwrap_or_default();
            return Ok((base, vec![root.clone()]));
        }

        let pattern = glob::Pattern::new(&self.config.pattern)
            .map_err(|e| self.unreadable(format!("invalid pattern '{}': {e}", self.config.pattern)))?;
        let max_depth = if self.config.recursive { usize::MAX } else { 1 };

        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| pattern.matches(name))
            })
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        Ok((root.clone(), files))
    }
}

impl Extractor for JsonLinesExtractor {
    fn source_name(&self) -> &str {
        &self.config.source_name
    }

    fn open(&self) -> Result<RecordStream, ExtractionError> {
        let (base, files) = self.discover_files()?;
        info!(
            source = %self.config.source_name,
            path = %self.config.path.display(),
            files = files.len(),
            "opened JSON-lines source"
        );

        let state = ReadState {
            source: self.config.source_name.clone(),
            base,
            files: files.into(),
            current: None,
            finished: false,
        };
        let stream = futures::stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        });
        Ok(Box::pin(stream))
    }
}

// ── Line reading ─────────────────────────────────────────────────────────────

struct OpenFile {
    name: String,
    modified: DateTime<Utc>,
    reader: BufReader<tokio::fs::File>,
    buf: Vec<u8>,
    line_no: usize,
}

struct ReadState {
    source: String,
    base: PathBuf,
    files: VecDeque<PathBuf>,
    current: Option<OpenFile>,
    finished: bool,
}

impl ReadState {
    async fn next_item(&mut self) -> Option<Result<SourceRecord, ExtractionError>> {
        loop {
            if self.finished {
                return None;
            }
            if self.current.is_none() {
                let path = self.files.pop_front()?;
                match self.open_file(&path).await {
                    Ok(file) => self.current = Some(file),
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            }

            let file = self.current.as_mut()?;
            file.buf.clear();
            match file.reader.read_until(b'\n', &mut file.buf).await {
                Ok(0) => {
                    debug!(file = %file.name, lines = file.line_no, "finished file");
                    self.current = None;
                }
                Ok(_) => {
                    file.line_no += 1;
                    let location = format!("{}#{}", file.name, file.line_no);
                    let line = match std::str::from_utf8(&file.buf) {
                        Ok(line) => line,
                        Err(e) => {
                            return Some(Err(ExtractionError::Malformed {
                                record: format!("{}:{location}", self.source),
                                reason: format!("invalid UTF-8: {e}"),
                            }));
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(parse_line(&self.source, &location, file.modified, line));
                }
                Err(e) => {
                    // A read error leaves the rest of the file unreachable.
                    self.finished = true;
                    return Some(Err(ExtractionError::Unreadable {
                        source_name: self.source.clone(),
                        reason: format!("{} after line {}: {e}", file.name, file.line_no),
                    }));
                }
            }
        }
    }

    async fn open_file(&self, path: &Path) -> Result<OpenFile, ExtractionError> {
        let unreadable = |e: std::io::Error| ExtractionError::Unreadable {
            source_name: self.source.clone(),
            reason: format!("{}: {e}", path.display()),
        };
        let handle = tokio::fs::File::open(path).await.map_err(unreadable)?;
        let modified = handle
            .metadata()
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let name = path
            .strip_prefix(&self.base)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        Ok(OpenFile {
            name,
            modified,
            reader: BufReader::new(handle),
            buf: Vec::new(),
            line_no: 0,
        })
    }
}

fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode one non-blank line into a record.
fn parse_line(
    default_source: &str,
    location: &str,
    default_fetched_at: DateTime<Utc>,
    line: &str,
) -> Result<SourceRecord, ExtractionError> {
    let malformed = |reason: String| ExtractionError::Malformed {
        record: format!("{default_source}:{location}"),
        reason,
    };

    let value: Value = serde_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(malformed("expected a JSON object".to_string()));
    };

    let payload: RawPayload = match object.remove("payload") {
        Some(Value::Object(payload)) => payload,
        other => {
            // Not an envelope: the whole line is the payload.
            if let Some(value) = other {
                object.insert("payload".to_string(), value);
            }
            let origin_id = id_text(object.get("id")).unwrap_or_else(|| location.to_string());
            return Ok(SourceRecord {
                source: default_source.to_string(),
                origin_id,
                payload: object,
                fetched_at: default_fetched_at,
            });
        }
    };

    let source = match object.get("source") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => default_source.to_string(),
    };
    let origin_id = id_text(object.get("origin_id"))
        .or_else(|| id_text(payload.get("id")))
        .unwrap_or_else(|| location.to_string());
    let fetched_at = match object.get("fetched_at") {
        None | Some(Value::Null) => default_fetched_at,
        Some(Value::String(s)) => parse_flexible_datetime(s)
            .ok_or_else(|| malformed(format!("unparseable fetched_at '{s}'")))?,
        Some(other) => return Err(malformed(format!("fetched_at must be a string, got {other}"))),
    };

    Ok(SourceRecord {
        source,
        origin_id,
        payload,
        fetched_at,
    })
}
