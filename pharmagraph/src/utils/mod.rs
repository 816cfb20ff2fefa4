//! Shared utilities.
//!
//! Includes:
//! - Date helpers (flexible parsing, ISO normalisation, store timestamps)
//! - String helpers (whitespace normalisation, truncation, placeholder detection,
//!   key and path normalisation for fingerprints)
//! - Atomic JSON file replacement

pub mod datetime;
pub mod fs;
pub mod text;

pub use datetime::{format_timestamp, normalize_date, parse_date, parse_flexible_datetime};
pub use fs::write_json_atomic;
pub use text::{
    is_placeholder, normalize_key, normalize_path, normalize_whitespace, sanitize_key, snippet,
    truncate_chars, truncate_with_ellipsis,
};
