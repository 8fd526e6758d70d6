//! Extraction algorithms shared by two or more source parsers: active
//! duration estimation, digest construction, tool-call summarization,
//! file-path extraction, and cumulative-token delta reconstruction.

use crate::session::TokenUsage;
use serde_json::Value;
use std::collections::HashSet;

/// Consecutive-gap ceiling for duration estimation.
pub const GAP_CAP_MS: i64 = 5 * 60 * 1000;
/// Per-message character ceiling in digests.
pub const MESSAGE_CHAR_LIMIT: usize = 500;
/// Overall digest character ceiling.
pub const DIGEST_CHAR_LIMIT: usize = 4000;

const TRUNCATION_MARKER: &str = "…[truncated]";

// ── Duration estimation ─────────────────────────────────────────────────────

/// Estimate active time from event timestamps: sum of consecutive gaps,
/// each capped at [`GAP_CAP_MS`]. Non-positive gaps contribute nothing, so
/// duplicate and out-of-order timestamps are harmless.
pub fn estimate_active_duration_ms(timestamps: &[i64]) -> i64 {
    let mut sorted: Vec<i64> = timestamps.to_vec();
    sorted.sort_unstable();
    sorted
        .windows(2)
        .map(|w| (w[1] - w[0]).clamp(0, GAP_CAP_MS))
        .sum()
}

// ── Boilerplate detection and titles ────────────────────────────────────────

/// Prefixes of wrapper messages the tools inject around real user input.
/// A message starting with one of these is never a title and never enters
/// a digest as user prose.
const BOILERPLATE_PREFIXES: &[&str] = &[
    "<system-reminder",
    "<environment_context",
    "<environment_details",
    "<user_instructions",
    "<command-name",
    "<local-command",
    "<task>",
    "Caveat: the messages below",
    "# AGENTS",
    "[Request interrupted",
];

pub fn is_boilerplate_user_text(text: &str) -> bool {
    let trimmed = text.trim_start();
    BOILERPLATE_PREFIXES
        .iter()
        .any(|p| trimmed.starts_with(p))
}

/// Infer a session title from the first meaningful user message: first
/// non-boilerplate, non-empty message, clipped to one line.
pub fn infer_title<'a>(user_texts: impl Iterator<Item = &'a str>) -> Option<String> {
    for text in user_texts {
        let trimmed = text.trim();
        if trimmed.is_empty() || is_boilerplate_user_text(trimmed) {
            continue;
        }
        let first_line = trimmed.lines().next().unwrap_or(trimmed);
        return Some(clip(first_line, 80));
    }
    None
}

// ── Digest construction ─────────────────────────────────────────────────────

/// Accumulates role-tagged message texts into a size-capped digest.
#[derive(Debug, Default)]
pub struct DigestBuilder {
    buf: String,
    /// Chars in `buf`; the caps are char budgets, not byte budgets.
    chars: usize,
    full: bool,
}

impl DigestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message. Boilerplate user text is skipped; each message
    /// is clipped to [`MESSAGE_CHAR_LIMIT`] and the digest as a whole to
    /// [`DIGEST_CHAR_LIMIT`].
    pub fn push(&mut self, role: &str, text: &str) {
        if self.full {
            return;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if role == "user" && is_boilerplate_user_text(trimmed) {
            return;
        }
        let entry = format!("{}: {}\n", role, clip(trimmed, MESSAGE_CHAR_LIMIT));
        let entry_chars = entry.chars().count();
        if self.chars + entry_chars > DIGEST_CHAR_LIMIT {
            let remaining = DIGEST_CHAR_LIMIT.saturating_sub(self.chars);
            let clipped = clip(&entry, remaining);
            self.chars += clipped.chars().count();
            self.buf.push_str(&clipped);
            if !self.buf.ends_with(TRUNCATION_MARKER) {
                self.buf.push_str(TRUNCATION_MARKER);
            }
            self.full = true;
            return;
        }
        self.buf.push_str(&entry);
        self.chars += entry_chars;
    }

    pub fn finish(self) -> String {
        self.buf.trim_end().to_string()
    }
}

/// Clip to a character budget on a char boundary, appending the truncation
/// marker when anything was dropped.
pub fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text
        .chars()
        .take(limit.saturating_sub(TRUNCATION_MARKER.chars().count()))
        .collect();
    format!("{kept}{TRUNCATION_MARKER}")
}

// ── Tool-call summarization ─────────────────────────────────────────────────

/// Argument keys that carry a file path, in preference order.
const PATH_ARG_KEYS: &[&str] = &[
    "file_path",
    "filePath",
    "target_file",
    "targetFile",
    "notebook_path",
    "path",
    "file",
    "url",
];

const COMMAND_ARG_KEYS: &[&str] = &["command", "cmd", "script"];

/// One-line human-readable summary of a tool invocation.
///
/// Shell-like tools show their command; path-bearing tools show the
/// shortened path; anything else falls back to the bare tool name.
pub fn summarize_tool_call(name: &str, args: &Value) -> String {
    let lower = name.to_ascii_lowercase();
    let is_shell = lower.contains("bash")
        || lower.contains("shell")
        || lower.contains("exec")
        || lower.contains("terminal");
    if is_shell {
        if let Some(cmd) = first_string(args, COMMAND_ARG_KEYS) {
            let one_line = cmd.lines().next().unwrap_or(&cmd);
            return format!("bash: {}", clip(one_line.trim(), 120));
        }
    }
    if let Some(path) = first_string(args, PATH_ARG_KEYS) {
        return format!("{} {}", name, shorten_path(&path));
    }
    name.to_string()
}

fn first_string(args: &Value, keys: &[&str]) -> Option<String> {
    let obj = args.as_object()?;
    for key in keys {
        if let Some(s) = obj.get(*key).and_then(Value::as_str) {
            if !s.trim().is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// Keep at most the last three path segments.
fn shorten_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() <= 3 {
        return path.to_string();
    }
    format!("…/{}", segments[segments.len() - 3..].join("/"))
}

// ── File-path extraction from tool arguments ────────────────────────────────

const EXTENSIONLESS_FILES: &[&str] = &[
    "Makefile",
    "Dockerfile",
    "Rakefile",
    "Gemfile",
    "Justfile",
    "Procfile",
    "LICENSE",
    "README",
    "Cargo.lock",
];

/// Recursively collect file paths referenced by a tool's arguments.
///
/// Values under path-like keys are taken directly; single-line shell
/// commands are scanned for path-shaped tokens. Candidates that look like
/// globs, regexes, or URIs are rejected.
pub fn extract_file_paths(args: &Value, out: &mut Vec<String>) {
    let mut seen: HashSet<String> = out.iter().cloned().collect();
    walk_for_paths(args, &mut seen, out);
}

fn walk_for_paths(value: &Value, seen: &mut HashSet<String>, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                if let Some(s) = val.as_str() {
                    if PATH_ARG_KEYS.contains(&key.as_str()) {
                        push_candidate(s, seen, out);
                        continue;
                    }
                    if COMMAND_ARG_KEYS.contains(&key.as_str()) {
                        scan_command_for_paths(s, seen, out);
                        continue;
                    }
                }
                walk_for_paths(val, seen, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_for_paths(item, seen, out);
            }
        }
        _ => {}
    }
}

fn scan_command_for_paths(command: &str, seen: &mut HashSet<String>, out: &mut Vec<String>) {
    // Multi-line commands (heredocs, scripts) are full of false positives.
    if command.contains('\n') {
        return;
    }
    for token in command.split_whitespace() {
        let token = token.trim_matches(|c| matches!(c, '\'' | '"' | '(' | ')' | ';' | ','));
        if token.contains('/') || looks_like_file_name(token) {
            push_candidate(token, seen, out);
        }
    }
}

fn push_candidate(raw: &str, seen: &mut HashSet<String>, out: &mut Vec<String>) {
    let candidate = raw.trim();
    if !is_plausible_file_path(candidate) {
        return;
    }
    if seen.insert(candidate.to_string()) {
        out.push(candidate.to_string());
    }
}

fn is_plausible_file_path(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.len() > 512 {
        return false;
    }
    // Globs, regex fragments, URIs, flags, and anything with whitespace.
    if candidate.chars().any(|c| {
        c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '|' | '\\' | '$')
    }) {
        return false;
    }
    if candidate.contains("://") || candidate.starts_with('-') {
        return false;
    }
    let last = candidate.rsplit('/').next().unwrap_or(candidate);
    looks_like_file_name(last)
}

fn looks_like_file_name(segment: &str) -> bool {
    if EXTENSIONLESS_FILES.contains(&segment) {
        return true;
    }
    // A dot that is neither leading-only ("." "..") nor a trailing period.
    match segment.rfind('.') {
        Some(idx) => idx > 0 && idx + 1 < segment.len(),
        None => false,
    }
}

// ── Cumulative-token delta reconstruction ───────────────────────────────────

/// A point-in-time cumulative token count emitted by a log-file source.
/// Per-day usage is the difference of two snapshots, never a sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub ts_ms: i64,
    pub input: u64,
    pub cached_input: u64,
    pub output: u64,
    pub reasoning: u64,
}

/// Reconstruct in-window usage from cumulative snapshots.
///
/// `baseline` is the last snapshot strictly before the window start (or
/// `None`, treated as all-zero); `at_end` is the last snapshot at-or-before
/// the window end. Every per-field delta is clamped at zero. The input
/// field is additionally cache-adjusted: `input = max(0, Δraw − Δcached)`,
/// because the raw input counter folds cache hits in. That clamp assumes
/// cached tokens are a subset of raw input tokens upstream; it is a known
/// approximation, not a checked invariant.
pub fn reconstruct_usage(
    baseline: Option<&TokenSnapshot>,
    at_end: Option<&TokenSnapshot>,
) -> TokenUsage {
    let Some(end) = at_end else {
        return TokenUsage::default();
    };
    let zero = TokenSnapshot::default();
    let base = baseline.unwrap_or(&zero);

    let raw_input = end.input.saturating_sub(base.input);
    let cached = end.cached_input.saturating_sub(base.cached_input);
    let mut usage = TokenUsage {
        input: raw_input.saturating_sub(cached),
        output: end.output.saturating_sub(base.output),
        reasoning: end.reasoning.saturating_sub(base.reasoning),
        cache_read: cached,
        cache_write: 0,
        total: 0,
    };
    usage.recompute_total();
    usage
}

/// Pick the delta endpoints out of an ordered-or-not snapshot list.
pub fn snapshot_endpoints(
    snapshots: &[TokenSnapshot],
    window_start_ms: i64,
    window_end_ms: i64,
) -> (Option<&TokenSnapshot>, Option<&TokenSnapshot>) {
    let mut baseline: Option<&TokenSnapshot> = None;
    let mut at_end: Option<&TokenSnapshot> = None;
    for snap in snapshots {
        if snap.ts_ms < window_start_ms
            && baseline.is_none_or(|current| snap.ts_ms >= current.ts_ms)
        {
            baseline = Some(snap);
        }
        if snap.ts_ms <= window_end_ms && at_end.is_none_or(|current| snap.ts_ms >= current.ts_ms) {
            at_end = Some(snap);
        }
    }
    (baseline, at_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duration_gap_cap() {
        // 60s gap kept, 940s gap capped to 300s.
        let ts = [0i64, 60_000, 1_000_000];
        assert_eq!(estimate_active_duration_ms(&ts), 360_000);
    }

    #[test]
    fn test_duration_ignores_order_and_duplicates() {
        let ts = [60_000i64, 0, 60_000];
        assert_eq!(estimate_active_duration_ms(&ts), 60_000);
        assert_eq!(estimate_active_duration_ms(&[]), 0);
        assert_eq!(estimate_active_duration_ms(&[42]), 0);
    }

    #[test]
    fn test_boilerplate_detection() {
        assert!(is_boilerplate_user_text("<system-reminder>x</system-reminder>"));
        assert!(is_boilerplate_user_text("  <environment_context>"));
        assert!(is_boilerplate_user_text("Caveat: the messages below were generated"));
        assert!(!is_boilerplate_user_text("fix the login bug"));
    }

    #[test]
    fn test_infer_title_skips_boilerplate() {
        let msgs = ["<user_instructions>be nice</user_instructions>", "", "add retry logic\nmore detail"];
        let title = infer_title(msgs.iter().copied()).unwrap();
        assert_eq!(title, "add retry logic");
    }

    #[test]
    fn test_digest_roles_and_message_cap() {
        let mut b = DigestBuilder::new();
        b.push("user", "hello");
        b.push("assistant", &"x".repeat(600));
        let digest = b.finish();
        assert!(digest.starts_with("user: hello\nassistant: x"));
        assert!(digest.contains(TRUNCATION_MARKER));
        // 500-char message cap: the long message was clipped.
        assert!(digest.len() < 600);
    }

    #[test]
    fn test_digest_overall_cap() {
        let mut b = DigestBuilder::new();
        for _ in 0..20 {
            b.push("assistant", &"y".repeat(400));
        }
        let digest = b.finish();
        assert!(digest.len() <= DIGEST_CHAR_LIMIT + TRUNCATION_MARKER.len());
        assert!(digest.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_digest_overall_cap_counts_chars_not_bytes() {
        let mut ascii = DigestBuilder::new();
        let mut accented = DigestBuilder::new();
        for _ in 0..12 {
            ascii.push("assistant", &"e".repeat(400));
            accented.push("assistant", &"é".repeat(400));
        }
        // Same char budget regardless of byte width.
        assert_eq!(
            ascii.finish().chars().count(),
            accented.finish().chars().count()
        );
    }

    #[test]
    fn test_summarize_shell_tool() {
        let args = json!({"command": "cargo test --workspace"});
        assert_eq!(summarize_tool_call("Bash", &args), "bash: cargo test --workspace");
    }

    #[test]
    fn test_summarize_path_tool() {
        let args = json!({"file_path": "/home/me/proj/src/lib/deep/mod.rs"});
        assert_eq!(
            summarize_tool_call("Read", &args),
            "Read …/lib/deep/mod.rs"
        );
    }

    #[test]
    fn test_summarize_fallback_bare_name() {
        assert_eq!(summarize_tool_call("TodoWrite", &json!({"items": []})), "TodoWrite");
    }

    #[test]
    fn test_extract_paths_from_typed_keys() {
        let args = json!({
            "file_path": "/src/main.rs",
            "nested": {"path": "/src/lib.rs"},
            "edits": [{"target_file": "/src/util.rs"}]
        });
        let mut out = Vec::new();
        extract_file_paths(&args, &mut out);
        assert!(out.contains(&"/src/main.rs".to_string()));
        assert!(out.contains(&"/src/lib.rs".to_string()));
        assert!(out.contains(&"/src/util.rs".to_string()));
    }

    #[test]
    fn test_extract_paths_from_single_line_command() {
        let args = json!({"command": "cat src/config.toml Makefile"});
        let mut out = Vec::new();
        extract_file_paths(&args, &mut out);
        assert_eq!(out, vec!["src/config.toml", "Makefile"]);
    }

    #[test]
    fn test_extract_paths_skips_heredoc_and_globs() {
        let mut out = Vec::new();
        extract_file_paths(&json!({"command": "cat <<EOF\n/fake/a.rs\nEOF"}), &mut out);
        assert!(out.is_empty());
        extract_file_paths(&json!({"path": "src/**/*.rs"}), &mut out);
        assert!(out.is_empty());
        extract_file_paths(&json!({"url": "https://example.com/x.rs"}), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_extract_paths_dedup() {
        let args = json!({"file_path": "/a/b.rs", "nested": {"path": "/a/b.rs"}});
        let mut out = Vec::new();
        extract_file_paths(&args, &mut out);
        assert_eq!(out, vec!["/a/b.rs"]);
    }

    fn snap(ts: i64, input: u64, cached: u64, output: u64, reasoning: u64) -> TokenSnapshot {
        TokenSnapshot {
            ts_ms: ts,
            input,
            cached_input: cached,
            output,
            reasoning,
        }
    }

    #[test]
    fn test_reconstruct_usage_delta() {
        let base = snap(10, 1000, 400, 200, 50);
        let end = snap(90, 5000, 1400, 900, 150);
        let usage = reconstruct_usage(Some(&base), Some(&end));
        // raw Δinput = 4000, Δcached = 1000 → input 3000
        assert_eq!(usage.input, 3000);
        assert_eq!(usage.cache_read, 1000);
        assert_eq!(usage.output, 700);
        assert_eq!(usage.reasoning, 100);
        assert_eq!(usage.total, 3000 + 1000 + 700 + 100);
    }

    #[test]
    fn test_reconstruct_usage_no_end_snapshot_is_zero() {
        let base = snap(10, 1000, 0, 0, 0);
        assert_eq!(reconstruct_usage(Some(&base), None), TokenUsage::default());
        assert_eq!(reconstruct_usage(None, None), TokenUsage::default());
    }

    #[test]
    fn test_reconstruct_usage_clamps_negative_deltas() {
        // Counter reset mid-day: end below baseline clamps to zero.
        let base = snap(10, 9000, 100, 500, 0);
        let end = snap(90, 100, 50, 20, 0);
        let usage = reconstruct_usage(Some(&base), Some(&end));
        assert_eq!(usage.input, 0);
        assert_eq!(usage.output, 0);
        assert_eq!(usage.cache_read, 0);
    }

    #[test]
    fn test_snapshot_endpoints() {
        let snaps = vec![snap(5, 1, 0, 0, 0), snap(50, 2, 0, 0, 0), snap(150, 3, 0, 0, 0)];
        let (baseline, at_end) = snapshot_endpoints(&snaps, 10, 100);
        assert_eq!(baseline.unwrap().ts_ms, 5);
        assert_eq!(at_end.unwrap().ts_ms, 50);

        // No snapshot before the window → no baseline.
        let (baseline, at_end) = snapshot_endpoints(&snaps, 0, 100);
        assert!(baseline.is_none());
        assert_eq!(at_end.unwrap().ts_ms, 50);
    }
}
