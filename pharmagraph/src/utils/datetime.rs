//! Date parsing and formatting for source payloads and stored properties.
//!
//! Sources disagree on date formats (`2024-01-15`, `01/15/2024`, full RFC 3339
//! timestamps). Stored calendar dates are normalised to ISO `YYYY-MM-DD` so
//! that string comparison in the store matches chronological order.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Parse a datetime string in various common formats into a UTC [`DateTime`].
///
/// Supported formats (attempted in order):
/// 1. RFC 3339 / ISO 8601 with timezone: `"2024-01-15T10:30:00Z"`, `"2024-01-15T10:30:00+05:00"`
/// 2. ISO 8601 with sub-seconds but no timezone: `"2024-01-15T10:30:00.123"`
/// 3. ISO 8601 without timezone (assumed UTC): `"2024-01-15T10:30:00"`
/// 4. Date only (midnight UTC): `"2024-01-15"`
/// 5. US date format (midnight UTC): `"01/15/2024"`
/// 6. Compact date (midnight UTC): `"20240115"`
///
/// Returns `None` for empty input or unrecognised formats.
pub fn parse_flexible_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&ndt));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&ndt));
    }

    parse_date(s)
        .and_then(|nd| nd.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// Parse a calendar date, accepting full timestamps (the time part is dropped).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"] {
        if let Ok(nd) = NaiveDate::parse_from_str(s, format) {
            return Some(nd);
        }
    }
    if s.len() > 10 && s.contains('T') {
        return parse_flexible_datetime(s).map(|dt| dt.date_naive());
    }
    None
}

/// Normalise any supported date representation to `YYYY-MM-DD`.
pub fn normalize_date(s: &str) -> Option<String> {
    parse_date(s).map(|nd| nd.format("%Y-%m-%d").to_string())
}

/// Format a [`DateTime<Utc>`] as an RFC 3339 timestamp with nanosecond precision,
/// accepted by Cypher's `datetime()`.
///
/// Output format: `"2024-01-15T10:30:00.000000000Z"`.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339_with_offset() {
        // +05:00 offset → 10:30 local = 05:30 UTC
        let dt = parse_flexible_datetime("2024-01-15T10:30:00+05:00").expect("should parse");
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 5, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_iso_no_tz() {
        let dt = parse_flexible_datetime("2024-01-15T10:30:00").expect("should parse");
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_date_only_formats() {
        let midnight = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(parse_flexible_datetime("2024-01-15"), Some(midnight));
        assert_eq!(parse_flexible_datetime("01/15/2024"), Some(midnight));
        assert_eq!(parse_flexible_datetime("20240115"), Some(midnight));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_flexible_datetime("not a date").is_none());
        assert!(parse_flexible_datetime("2024-13-01").is_none());
        assert!(parse_flexible_datetime("").is_none());
        assert!(parse_date("   ").is_none());
    }

    #[test]
    fn test_normalize_date_from_various_inputs() {
        assert_eq!(normalize_date("03/02/2021").as_deref(), Some("2021-03-02"));
        assert_eq!(normalize_date("2021-03-02").as_deref(), Some("2021-03-02"));
        assert_eq!(normalize_date("2021-03-02T23:59:00Z").as_deref(), Some("2021-03-02"));
        assert_eq!(normalize_date("March 2nd"), None);
    }

    #[test]
    fn test_normalized_dates_sort_chronologically() {
        let earlier = normalize_date("12/31/2019").unwrap();
        let later = normalize_date("2020-01-01").unwrap();
        assert!(earlier < later);
    }

    #[test]
    fn test_format_timestamp_roundtrip() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 8, 45, 30).unwrap();
        let formatted = format_timestamp(&dt);
        assert_eq!(formatted, "2024-06-15T08:45:30.000000000Z");
        assert_eq!(parse_flexible_datetime(&formatted), Some(dt));
    }
}
