//! Atomic file replacement.

use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::errors::Result;

/// Serialize `value` as pretty JSON into a temporary file next to `path`,
/// then rename it over `path`. Readers see the old or the new content, never
/// a partial write. Missing parent directories are created.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_replaces_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("out.json");

        write_json_atomic(&path, &json!({"v": 1})).expect("first write");
        write_json_atomic(&path, &json!({"v": 2})).expect("second write");

        let content = std::fs::read_to_string(&path).expect("readable");
        let value: serde_json::Value = serde_json::from_str(&content).expect("valid JSON");
        assert_eq!(value["v"], 2);
        // Only the target remains; the temp file was renamed away.
        let entries = std::fs::read_dir(path.parent().expect("parent")).expect("dir").count();
        assert_eq!(entries, 1);
    }
}
