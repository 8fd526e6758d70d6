//! Helpers shared by two or more source parsers.

use chrono::DateTime;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// HOME-based root discovery, matching how the tools themselves locate
/// their storage.
pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Parse the timestamp shapes that occur across the tools' storage:
/// RFC 3339, naive ISO, epoch milliseconds, epoch seconds.
pub fn parse_timestamp_ms(ts: &str) -> Option<i64> {
    let trimmed = ts.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        return Some(numeric_timestamp_ms(n));
    }
    None
}

/// Epoch seconds vs. milliseconds disambiguation: anything below ~2001 in
/// millisecond terms is treated as seconds.
pub fn numeric_timestamp_ms(n: f64) -> i64 {
    if n >= 1e12 {
        n as i64
    } else {
        (n * 1000.0) as i64
    }
}

/// Last-write-wins dedup by a stable id, preserving first-appearance
/// order. Streamed chunks repeat an id with increasingly complete
/// payloads, so the last occurrence replaces earlier ones in place.
/// Items without an id are kept as-is.
pub fn dedup_keep_last<T>(items: Vec<T>, id_of: impl Fn(&T) -> Option<String>) -> Vec<T> {
    let mut result: Vec<T> = Vec::with_capacity(items.len());
    let mut index_by_id: HashMap<String, usize> = HashMap::new();
    for item in items {
        match id_of(&item) {
            Some(id) => {
                if let Some(&idx) = index_by_id.get(&id) {
                    result[idx] = item;
                } else {
                    index_by_id.insert(id, result.len());
                    result.push(item);
                }
            }
            None => result.push(item),
        }
    }
    result
}

/// Read and deserialize one JSON file, logging and returning `None` on any
/// failure. Used where a single bad file must not abort a scan.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Skipping unreadable file {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("Skipping unparseable file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let ms = parse_timestamp_ms("2026-03-10T12:00:00.500Z").unwrap();
        assert_eq!(ms % 1000, 500);
    }

    #[test]
    fn test_parse_timestamp_naive() {
        assert!(parse_timestamp_ms("2026-03-10T12:00:00").is_some());
    }

    #[test]
    fn test_parse_timestamp_epoch_forms() {
        assert_eq!(parse_timestamp_ms("1767000000000"), Some(1_767_000_000_000));
        assert_eq!(parse_timestamp_ms("1767000000"), Some(1_767_000_000_000));
        assert_eq!(parse_timestamp_ms("garbage"), None);
    }

    #[test]
    fn test_dedup_keep_last_replaces_in_place() {
        let items = vec![("a", 1), ("b", 1), ("a", 2), ("c", 1), ("a", 3)];
        let deduped = dedup_keep_last(items, |(id, _)| Some(id.to_string()));
        assert_eq!(deduped, vec![("a", 3), ("b", 1), ("c", 1)]);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let items = vec![("a", 1), ("a", 2), ("b", 9)];
        let once = dedup_keep_last(items, |(id, _)| Some(id.to_string()));
        let twice = dedup_keep_last(once.clone(), |(id, _)| Some(id.to_string()));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dedup_keeps_id_less_items() {
        let items = vec![(None::<&str>, 1), (None, 2)];
        let deduped = dedup_keep_last(items, |(id, _)| id.map(str::to_string));
        assert_eq!(deduped.len(), 2);
    }
}
