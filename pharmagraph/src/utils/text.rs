//! Text processing utilities: whitespace normalisation, bounded truncation,
//! placeholder detection and identifier sanitising.

use regex::Regex;
use std::sync::OnceLock;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
static NON_IDENT_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

fn non_ident_re() -> &'static Regex {
    NON_IDENT_RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]+").expect("static regex is valid"))
}

/// Values that stand in for "we don't know yet". Compared after trimming and
/// lowercasing. The empty string is included.
pub const PLACEHOLDERS: &[&str] = &["", "unknown", "n/a", "none", "null", "-"];

/// Replace consecutive whitespace (spaces, tabs, newlines) with a single space
/// and trim leading/trailing whitespace.
///
/// Returns an empty string for inputs that are entirely whitespace.
pub fn normalize_whitespace(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    whitespace_re().replace_all(s, " ").trim().to_string()
}

/// Truncate `s` to at most `max_len` Unicode scalar values, appending `"..."` if
/// truncation occurred. `max_len` counts characters (not bytes), making this safe
/// for multi-byte UTF-8 content including emoji and CJK characters.
///
/// Special cases:
/// - `max_len == 0` → empty string
/// - `max_len <= 3` → up to `max_len` dots (e.g. `max_len=2` → `".."`)
pub fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max_len {
        return s.to_string();
    }

    if max_len <= 3 {
        return ".".repeat(max_len);
    }

    // Find byte offset of the (max_len - 3)th character.
    let keep_chars = max_len - 3;
    let byte_offset = s
        .char_indices()
        .nth(keep_chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    format!("{}...", &s[..byte_offset])
}

/// Hard-cut `s` to at most `max_len` characters without adding an ellipsis.
///
/// Used for stored full text, where the marker would corrupt the content.
pub fn truncate_chars(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((byte_offset, _)) => s[..byte_offset].to_string(),
        None => s.to_string(),
    }
}

/// Build a display snippet from free text: whitespace-normalised, then
/// truncated with an ellipsis. A pure function of `text` and `max_len`.
pub fn snippet(text: &str, max_len: usize) -> String {
    truncate_with_ellipsis(&normalize_whitespace(text), max_len)
}

/// Whether `s` is a recognised placeholder such as `"Unknown"` or `""`.
pub fn is_placeholder(s: &str) -> bool {
    let folded = s.trim().to_lowercase();
    PLACEHOLDERS.contains(&folded.as_str())
}

/// Case-fold and collapse whitespace. Used for fingerprint key values.
pub fn normalize_key(s: &str) -> String {
    normalize_whitespace(s).to_lowercase()
}

/// Normalise a file path for identity purposes: trimmed, forward slashes,
/// lowercased, duplicate separators collapsed.
pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/").to_lowercase();
    let mut out = String::with_capacity(unified.len());
    let mut prev_slash = false;
    for c in unified.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

/// Turn an arbitrary payload key into a safe property name
/// (`[A-Za-z_][A-Za-z0-9_]*`). Returns `None` when nothing usable remains.
pub fn sanitize_key(key: &str) -> Option<String> {
    let replaced = non_ident_re().replace_all(key.trim(), "_");
    let trimmed = replaced.trim_matches('_').to_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return Some(format!("f_{trimmed}"));
    }
    Some(trimmed)
}
