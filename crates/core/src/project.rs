//! Project-path resolution heuristic.
//!
//! Sources that do not record a project directory outright still scatter
//! path-shaped strings across their conversation data. We collect every
//! plausible candidate, normalize it, and prefer the nearest enclosing git
//! root, falling back to the first candidate that exists on disk.

use serde_json::Value;
use std::path::{Path, PathBuf};

/// Structured fields that tend to hold a project or file location.
const PATH_FIELD_KEYS: &[&str] = &[
    "cwd",
    "workingDirectory",
    "working_directory",
    "workspaceRoot",
    "rootPath",
    "projectPath",
    "directory",
    "folder",
    "fsPath",
    "uri",
    "fileUri",
    "path",
    "filePath",
    "file_path",
    "relativeWorkspacePath",
];

/// Collect candidate path strings from arbitrary structured data.
///
/// Strings under known keys are taken as-is. A string under *any* key that
/// itself looks like JSON is decoded and walked too: several sources stash
/// serialized context objects inside generic text fields.
pub fn collect_path_candidates(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::String(s) => {
                        if PATH_FIELD_KEYS.contains(&key.as_str()) && !s.trim().is_empty() {
                            out.push(s.clone());
                        } else if s.starts_with('{') {
                            if let Ok(embedded) = serde_json::from_str::<Value>(s) {
                                if embedded.is_object() {
                                    collect_path_candidates(&embedded, out);
                                }
                            }
                        }
                    }
                    _ => collect_path_candidates(val, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_path_candidates(item, out);
            }
        }
        _ => {}
    }
}

/// Resolve a project directory from raw candidates.
///
/// Preference order: (1) the nearest ancestor containing a `.git` marker,
/// walking up from each candidate in turn; (2) the first candidate that is
/// an existing directory, or whose existing parent is. `None` when nothing
/// resolves.
pub fn resolve_project_path(candidates: &[String]) -> Option<PathBuf> {
    let normalized: Vec<PathBuf> = candidates
        .iter()
        .filter_map(|raw| normalize_candidate(raw))
        .collect();

    for path in &normalized {
        if let Some(root) = find_git_root(path) {
            return Some(root);
        }
    }

    for path in &normalized {
        if path.is_dir() {
            return Some(path.clone());
        }
        if let Some(parent) = path.parent() {
            if path.is_file() && parent.is_dir() {
                return Some(parent.to_path_buf());
            }
        }
    }

    None
}

/// Normalize one raw candidate: resolve `file://` URIs, expand a leading
/// `~`, and strip trailing `:line[:col]` suffixes. Relative paths are not
/// usable as project anchors and are dropped.
pub fn normalize_candidate(raw: &str) -> Option<PathBuf> {
    let mut s = raw.trim().to_string();
    if s.is_empty() {
        return None;
    }
    if let Some(rest) = s.strip_prefix("file://") {
        s = percent_decode(rest);
    }
    if s.starts_with('~') {
        s = shellexpand::tilde(&s).into_owned();
    }
    s = strip_line_suffix(&s);
    if !s.starts_with('/') {
        return None;
    }
    Some(PathBuf::from(s))
}

/// Strip `:123` or `:123:45` from the end of a path-like string.
fn strip_line_suffix(s: &str) -> String {
    let mut result = s;
    for _ in 0..2 {
        if let Some((head, tail)) = result.rsplit_once(':') {
            if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
                result = head;
                continue;
            }
        }
        break;
    }
    result.to_string()
}

/// Minimal percent-decoding for the characters that actually occur in
/// editor file URIs (spaces, mostly).
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                // Escapes decode to bytes, not chars: multi-byte UTF-8
                // sequences span several escapes.
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Walk upward from `start` (or its parent if it is a file path) until a
/// directory containing `.git` is found.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut current = if start.is_dir() {
        Some(start)
    } else {
        start.parent()
    };
    while let Some(dir) = current {
        // .git may be a directory or, for worktrees, a file.
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_candidates_typed_and_embedded() {
        let value = json!({
            "cwd": "/home/me/proj",
            "items": [{"uri": "file:///home/me/proj/src/a.rs"}],
            "context": "{\"filePath\": \"/home/me/proj/b.rs\"}",
            "note": "not a path"
        });
        let mut out = Vec::new();
        collect_path_candidates(&value, &mut out);
        assert!(out.contains(&"/home/me/proj".to_string()));
        assert!(out.contains(&"file:///home/me/proj/src/a.rs".to_string()));
        assert!(out.contains(&"/home/me/proj/b.rs".to_string()));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_normalize_file_uri() {
        assert_eq!(
            normalize_candidate("file:///home/me/my%20proj/a.rs"),
            Some(PathBuf::from("/home/me/my proj/a.rs"))
        );
    }

    #[test]
    fn test_normalize_file_uri_multibyte_escapes() {
        assert_eq!(
            normalize_candidate("file:///home/me/caf%C3%A9/a.rs"),
            Some(PathBuf::from("/home/me/café/a.rs"))
        );
        // A bare percent that is not an escape passes through.
        assert_eq!(
            normalize_candidate("file:///home/me/100%/a.rs"),
            Some(PathBuf::from("/home/me/100%/a.rs"))
        );
    }

    #[test]
    fn test_normalize_strips_line_numbers() {
        assert_eq!(
            normalize_candidate("/src/lib.rs:123"),
            Some(PathBuf::from("/src/lib.rs"))
        );
        assert_eq!(
            normalize_candidate("/src/lib.rs:123:45"),
            Some(PathBuf::from("/src/lib.rs"))
        );
    }

    #[test]
    fn test_normalize_rejects_relative() {
        assert_eq!(normalize_candidate("src/lib.rs"), None);
        assert_eq!(normalize_candidate(""), None);
    }

    #[test]
    fn test_git_root_walk() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        std::fs::create_dir_all(repo.join("src/deep")).unwrap();

        assert_eq!(find_git_root(&repo.join("src/deep")), Some(repo.clone()));
        assert_eq!(find_git_root(&repo), Some(repo.clone()));
        assert_eq!(find_git_root(tmp.path()), None);
    }

    #[test]
    fn test_resolve_prefers_git_root_over_existing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = tmp.path().join("plain");
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&plain).unwrap();
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        std::fs::create_dir_all(repo.join("src")).unwrap();

        let candidates = vec![
            plain.display().to_string(),
            repo.join("src").display().to_string(),
        ];
        assert_eq!(resolve_project_path(&candidates), Some(repo));
    }

    #[test]
    fn test_resolve_falls_back_to_existing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("work");
        std::fs::create_dir_all(&dir).unwrap();

        let candidates = vec![
            "/definitely/not/real/anywhere".to_string(),
            dir.display().to_string(),
        ];
        assert_eq!(resolve_project_path(&candidates), Some(dir));
    }

    #[test]
    fn test_resolve_none_when_nothing_exists() {
        let candidates = vec!["/nope/nothing/here".to_string()];
        assert_eq!(resolve_project_path(&candidates), None);
    }
}
