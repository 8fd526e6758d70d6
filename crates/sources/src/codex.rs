//! Codex event-stream logs.
//!
//! One JSONL file per session under `~/.codex/sessions`, either in a
//! date-partitioned `YYYY/MM/DD/` layout or the legacy flat
//! `rollout-YYYY-MM-DD-<id>.jsonl` naming. Each line is an independently
//! parseable record; malformed lines are skipped. Token counts arrive as
//! periodic *cumulative* snapshots, so per-day usage is reconstructed as a
//! delta across the window.

use crate::common::{home_dir, parse_timestamp_ms};
use crate::DaySource;
use anyhow::Result;
use chrono::{Datelike, Duration};
use serde::Deserialize;
use serde_json::Value;
use standup_core::extract::{
    estimate_active_duration_ms, extract_file_paths, infer_title, reconstruct_usage,
    snapshot_endpoints, summarize_tool_call, DigestBuilder, TokenSnapshot,
};
use standup_core::project::resolve_project_path;
use standup_core::{pricing, DayWindow, Session, SourceTool};
use std::io::BufRead;
use std::path::{Path, PathBuf};

pub struct CodexSource {
    sessions_root: PathBuf,
}

impl CodexSource {
    pub fn new() -> Self {
        let root = std::env::var("CODEX_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".codex"));
        Self {
            sessions_root: root.join("sessions"),
        }
    }

    pub fn with_root(sessions_root: PathBuf) -> Self {
        Self { sessions_root }
    }

    /// Candidate log files for the window: the date-partitioned directory
    /// for the target day and the day before (sessions cross midnight),
    /// plus legacy flat files whose name carries either date.
    fn candidate_files(&self, window: &DayWindow) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for date in [window.date - Duration::days(1), window.date] {
            let day_dir = self
                .sessions_root
                .join(format!("{:04}", date.year()))
                .join(format!("{:02}", date.month()))
                .join(format!("{:02}", date.day()));
            push_jsonl_files(&day_dir, &mut files);

            let legacy = format!("rollout-{}", date.format("%Y-%m-%d"));
            if let Ok(entries) = std::fs::read_dir(&self.sessions_root) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if name.starts_with(&legacy) && name.ends_with(".jsonl") {
                        files.push(path);
                    }
                }
            }
        }
        files.sort();
        files.dedup();
        files
    }
}

impl Default for CodexSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DaySource for CodexSource {
    fn tool(&self) -> SourceTool {
        SourceTool::Codex
    }

    fn is_available(&self) -> bool {
        self.sessions_root.is_dir()
    }

    fn sessions_for_day(&self, window: &DayWindow) -> Result<Vec<Session>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for path in self.candidate_files(window) {
            match parse_log_file(&path, window) {
                Some(session) => sessions.push(session),
                None => tracing::debug!("No in-window activity in {}", path.display()),
            }
        }
        Ok(sessions)
    }
}

// ── Raw record shapes ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawLine {
    timestamp: Option<String>,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct SessionMeta {
    id: String,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug)]
struct Turn {
    ts_ms: i64,
    role: &'static str,
    text: String,
}

// ── Parsing ─────────────────────────────────────────────────────────────────

fn parse_log_file(path: &Path, window: &DayWindow) -> Option<Session> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!("Skipping unreadable log {}: {}", path.display(), e);
            return None;
        }
    };
    let reader = std::io::BufReader::new(file);

    let mut session_id: Option<String> = None;
    let mut cwd: Option<String> = None;
    let mut models: Vec<String> = Vec::new();
    let mut turns: Vec<Turn> = Vec::new();
    let mut legacy_turns: Vec<Turn> = Vec::new();
    let mut saw_event_stream = false;
    let mut tool_calls: Vec<String> = Vec::new();
    let mut files_touched: Vec<String> = Vec::new();
    let mut tool_ts: Vec<i64> = Vec::new();
    let mut snapshots: Vec<TokenSnapshot> = Vec::new();
    let mut min_ts = i64::MAX;
    let mut max_ts = i64::MIN;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawLine = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let ts_ms = raw
            .timestamp
            .as_deref()
            .and_then(parse_timestamp_ms)
            .unwrap_or(i64::MIN);
        if ts_ms != i64::MIN {
            min_ts = min_ts.min(ts_ms);
            max_ts = max_ts.max(ts_ms);
        }
        let in_window = window.contains(ts_ms);

        match raw.entry_type.as_str() {
            "session_meta" => {
                if let Ok(meta) = serde_json::from_value::<SessionMeta>(raw.payload) {
                    session_id = Some(meta.id);
                    if cwd.is_none() {
                        cwd = meta.cwd;
                    }
                }
            }
            "turn_context" => {
                if let Some(model) = raw.payload.get("model").and_then(Value::as_str) {
                    push_unique(&mut models, model);
                }
            }
            "event_msg" => {
                let payload_type = raw.payload.get("type").and_then(Value::as_str).unwrap_or("");
                match payload_type {
                    "user_message" | "agent_message" => {
                        saw_event_stream = true;
                        if !in_window {
                            continue;
                        }
                        let text = raw
                            .payload
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if text.is_empty() {
                            continue;
                        }
                        turns.push(Turn {
                            ts_ms,
                            role: if payload_type == "user_message" {
                                "user"
                            } else {
                                "assistant"
                            },
                            text: text.to_string(),
                        });
                    }
                    "token_count" => {
                        if let Some(snap) = parse_token_snapshot(&raw.payload, ts_ms) {
                            snapshots.push(snap);
                        }
                    }
                    _ => {}
                }
            }
            "response_item" => {
                let payload_type = raw.payload.get("type").and_then(Value::as_str).unwrap_or("");
                match payload_type {
                    // Legacy chat framing, used only when the event-typed
                    // stream is absent from the file.
                    "message" => {
                        if !in_window {
                            continue;
                        }
                        let role = match raw.payload.get("role").and_then(Value::as_str) {
                            Some("user") => "user",
                            Some("assistant") => "assistant",
                            _ => continue,
                        };
                        let text = content_blocks_text(&raw.payload);
                        if text.is_empty() {
                            continue;
                        }
                        legacy_turns.push(Turn {
                            ts_ms,
                            role,
                            text,
                        });
                    }
                    "function_call" => {
                        if !in_window {
                            continue;
                        }
                        let name = raw
                            .payload
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown");
                        let args: Value = raw
                            .payload
                            .get("arguments")
                            .and_then(Value::as_str)
                            .and_then(|s| serde_json::from_str(s).ok())
                            .unwrap_or(Value::Null);
                        push_unique(&mut tool_calls, &summarize_tool_call(name, &args));
                        extract_file_paths(&args, &mut files_touched);
                        tool_ts.push(ts_ms);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    if min_ts == i64::MAX || !window.overlaps(min_ts, max_ts) {
        return None;
    }

    let mut turns = if saw_event_stream { turns } else { legacy_turns };
    turns.sort_by_key(|t| t.ts_ms);
    if turns.is_empty() {
        return None;
    }

    let id = session_id.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("codex-session")
            .to_string()
    });

    let mut event_ts: Vec<i64> = turns.iter().map(|t| t.ts_ms).collect();
    event_ts.extend(&tool_ts);
    let start_ms = window.clamp(*event_ts.iter().min().unwrap_or(&window.start_ms));
    let end_ms = window.clamp(*event_ts.iter().max().unwrap_or(&window.end_ms));

    let mut digest = DigestBuilder::new();
    for turn in &turns {
        digest.push(turn.role, &turn.text);
    }
    let title = infer_title(
        turns
            .iter()
            .filter(|t| t.role == "user")
            .map(|t| t.text.as_str()),
    );

    let (baseline, at_end) = snapshot_endpoints(&snapshots, window.start_ms, window.end_ms);
    let usage = reconstruct_usage(baseline, at_end);

    let model_for_pricing = models.first().map(String::as_str).unwrap_or("");
    let cost_usd = pricing::estimate_cost(model_for_pricing, &usage);

    let mut candidates: Vec<String> = Vec::new();
    if let Some(ref dir) = cwd {
        candidates.push(dir.clone());
    }
    candidates.extend(files_touched.iter().cloned());

    let mut session = Session::new(id, SourceTool::Codex);
    session.project_path = resolve_project_path(&candidates);
    session.derive_project_name();
    session.start_ms = start_ms;
    session.end_ms = end_ms;
    session.active_duration_ms = estimate_active_duration_ms(&event_ts);
    session.title = title;
    session.digest = digest.finish();
    session.tool_calls = tool_calls;
    session.files_touched = files_touched;
    session.user_message_count = turns.iter().filter(|t| t.role == "user").count() as u64;
    session.assistant_message_count =
        turns.iter().filter(|t| t.role == "assistant").count() as u64;
    session.message_count = session.user_message_count + session.assistant_message_count;
    session.usage = usage;
    session.cost_usd = cost_usd;
    session.models = models;
    Some(session)
}

/// Cumulative counters live under `info.total_token_usage` in current logs
/// and directly in the payload in older ones.
fn parse_token_snapshot(payload: &Value, ts_ms: i64) -> Option<TokenSnapshot> {
    let counters = payload
        .get("info")
        .and_then(|info| info.get("total_token_usage"))
        .or_else(|| payload.get("total_token_usage"))
        .unwrap_or(payload);
    let field = |name: &str| counters.get(name).and_then(Value::as_u64).unwrap_or(0);
    let snap = TokenSnapshot {
        ts_ms,
        input: field("input_tokens"),
        cached_input: field("cached_input_tokens"),
        output: field("output_tokens"),
        reasoning: field("reasoning_output_tokens"),
    };
    if snap.input == 0 && snap.cached_input == 0 && snap.output == 0 && snap.reasoning == 0 {
        return None;
    }
    Some(snap)
}

fn content_blocks_text(payload: &Value) -> String {
    payload
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| {
                    let btype = b.get("type").and_then(Value::as_str)?;
                    if btype == "input_text" || btype == "output_text" || btype == "text" {
                        b.get("text").and_then(Value::as_str)
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn push_unique(target: &mut Vec<String>, item: &str) {
    if item.is_empty() {
        return;
    }
    if !target.iter().any(|existing| existing == item) {
        target.push(item.to_string());
    }
}

fn push_jsonl_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let pattern = format!("{}/*.jsonl", dir.display());
    if let Ok(paths) = glob::glob(&pattern) {
        out.extend(paths.filter_map(std::result::Result::ok));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::io::Write;

    fn window() -> DayWindow {
        DayWindow::for_date(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap())
    }

    fn iso(window: &DayWindow, offset_ms: i64) -> String {
        Utc.timestamp_millis_opt(window.start_ms + offset_ms)
            .unwrap()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    fn write_log(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    fn meta_line(window: &DayWindow, id: &str, cwd: &str) -> String {
        format!(
            r#"{{"timestamp":"{}","type":"session_meta","payload":{{"id":"{}","cwd":"{}"}}}}"#,
            iso(window, 1000),
            id,
            cwd
        )
    }

    fn user_line(window: &DayWindow, offset: i64, text: &str) -> String {
        format!(
            r#"{{"timestamp":"{}","type":"event_msg","payload":{{"type":"user_message","message":"{}"}}}}"#,
            iso(window, offset),
            text
        )
    }

    fn agent_line(window: &DayWindow, offset: i64, text: &str) -> String {
        format!(
            r#"{{"timestamp":"{}","type":"event_msg","payload":{{"type":"agent_message","message":"{}"}}}}"#,
            iso(window, offset),
            text
        )
    }

    fn token_line(window: &DayWindow, offset: i64, input: u64, cached: u64, output: u64) -> String {
        format!(
            r#"{{"timestamp":"{}","type":"event_msg","payload":{{"type":"token_count","info":{{"total_token_usage":{{"input_tokens":{},"cached_input_tokens":{},"output_tokens":{},"reasoning_output_tokens":0,"total_tokens":{}}}}}}}}}"#,
            iso(window, offset),
            input,
            cached,
            output,
            input + output
        )
    }

    #[test]
    fn test_parse_basic_session() {
        let tmp = tempfile::tempdir().unwrap();
        let w = window();
        let path = write_log(
            tmp.path(),
            "rollout-2026-03-10-abc.jsonl",
            &[
                meta_line(&w, "sess-1", "/tmp"),
                user_line(&w, 2000, "fix the tests"),
                agent_line(&w, 62_000, "done"),
                token_line(&w, 63_000, 5000, 1000, 800),
            ],
        );
        let session = parse_log_file(&path, &w).unwrap();
        assert_eq!(session.id, "sess-1");
        assert_eq!(session.message_count, 2);
        assert_eq!(session.user_message_count, 1);
        assert_eq!(session.title.as_deref(), Some("fix the tests"));
        // No baseline snapshot: full cumulative counts, cache-adjusted.
        assert_eq!(session.usage.input, 4000);
        assert_eq!(session.usage.cache_read, 1000);
        assert_eq!(session.usage.output, 800);
        assert_eq!(session.active_duration_ms, 60_000);
        assert!(session.digest.contains("user: fix the tests"));
    }

    #[test]
    fn test_token_delta_uses_pre_window_baseline() {
        let tmp = tempfile::tempdir().unwrap();
        let w = window();
        let path = write_log(
            tmp.path(),
            "rollout-2026-03-09-abc.jsonl",
            &[
                meta_line(&w, "sess-2", "/tmp"),
                // Baseline before the window start.
                token_line(&w, -3_600_000, 10_000, 2_000, 1_000),
                user_line(&w, 1000, "continue"),
                agent_line(&w, 2000, "ok"),
                token_line(&w, 3000, 14_000, 3_000, 1_500),
            ],
        );
        let session = parse_log_file(&path, &w).unwrap();
        // Δraw=4000, Δcached=1000 → input 3000; output Δ=500.
        assert_eq!(session.usage.input, 3000);
        assert_eq!(session.usage.cache_read, 1000);
        assert_eq!(session.usage.output, 500);
    }

    #[test]
    fn test_cached_only_snapshot_kept_as_baseline() {
        let tmp = tempfile::tempdir().unwrap();
        let w = window();
        let path = write_log(
            tmp.path(),
            "rollout-2026-03-09-cb.jsonl",
            &[
                meta_line(&w, "sess-2b", "/tmp"),
                // A cache-only warmup snapshot is still a real baseline.
                token_line(&w, -3_600_000, 0, 2_000, 0),
                user_line(&w, 1000, "continue"),
                agent_line(&w, 2000, "ok"),
                token_line(&w, 3000, 4_000, 3_000, 500),
            ],
        );
        let session = parse_log_file(&path, &w).unwrap();
        // Δraw=4000, Δcached=1000 → input 3000, not the no-baseline 1000.
        assert_eq!(session.usage.input, 3000);
        assert_eq!(session.usage.cache_read, 1000);
        assert_eq!(session.usage.output, 500);
    }

    #[test]
    fn test_out_of_window_records_excluded() {
        let tmp = tempfile::tempdir().unwrap();
        let w = window();
        let path = write_log(
            tmp.path(),
            "rollout-2026-03-10-b.jsonl",
            &[
                meta_line(&w, "sess-3", "/tmp"),
                user_line(&w, -5000, "yesterday's message"),
                user_line(&w, 1000, "today's message"),
                agent_line(&w, 2000, "reply"),
            ],
        );
        let session = parse_log_file(&path, &w).unwrap();
        assert_eq!(session.message_count, 2);
        assert_eq!(session.title.as_deref(), Some("today's message"));
        assert!(session.start_ms >= w.start_ms);
    }

    #[test]
    fn test_session_entirely_outside_window_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let w = window();
        let other = DayWindow::for_date(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        let path = write_log(
            tmp.path(),
            "rollout-2026-02-01-c.jsonl",
            &[
                meta_line(&other, "sess-4", "/tmp"),
                user_line(&other, 1000, "old"),
            ],
        );
        assert!(parse_log_file(&path, &w).is_none());
    }

    #[test]
    fn test_legacy_message_array_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let w = window();
        let line = format!(
            r#"{{"timestamp":"{}","type":"response_item","payload":{{"type":"message","role":"user","content":[{{"type":"input_text","text":"legacy hello"}}]}}}}"#,
            iso(&w, 1000)
        );
        let path = write_log(tmp.path(), "rollout-2026-03-10-d.jsonl", &[line]);
        let session = parse_log_file(&path, &w).unwrap();
        assert_eq!(session.message_count, 1);
        assert!(session.digest.contains("legacy hello"));
        // No session_meta: id falls back to the file stem.
        assert_eq!(session.id, "rollout-2026-03-10-d");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let w = window();
        let path = write_log(
            tmp.path(),
            "rollout-2026-03-10-e.jsonl",
            &[
                "not json at all".to_string(),
                "{\"half\":".to_string(),
                user_line(&w, 1000, "still works"),
            ],
        );
        let session = parse_log_file(&path, &w).unwrap();
        assert_eq!(session.message_count, 1);
    }

    #[test]
    fn test_tool_calls_summarized_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let w = window();
        let shell = format!(
            r#"{{"timestamp":"{}","type":"response_item","payload":{{"type":"function_call","name":"shell","arguments":"{{\"command\":\"cargo build\"}}"}}}}"#,
            iso(&w, 3000)
        );
        let path = write_log(
            tmp.path(),
            "rollout-2026-03-10-f.jsonl",
            &[
                user_line(&w, 1000, "build it"),
                shell.clone(),
                shell,
            ],
        );
        let session = parse_log_file(&path, &w).unwrap();
        assert_eq!(session.tool_calls, vec!["bash: cargo build"]);
    }

    #[test]
    fn test_candidate_discovery_partitioned_and_legacy() {
        let tmp = tempfile::tempdir().unwrap();
        let w = window();
        let day_dir = tmp.path().join("2026/03/10");
        write_log(&day_dir, "abc.jsonl", &[user_line(&w, 1000, "hi")]);
        write_log(
            tmp.path(),
            "rollout-2026-03-10-xyz.jsonl",
            &[user_line(&w, 2000, "ho")],
        );
        write_log(tmp.path(), "rollout-2025-01-01-old.jsonl", &[]);

        let source = CodexSource::with_root(tmp.path().to_path_buf());
        assert!(source.is_available());
        let files = source.candidate_files(&w);
        assert_eq!(files.len(), 2);
        let sessions = source.sessions_for_day(&w).unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn test_unavailable_root_yields_empty() {
        let source = CodexSource::with_root(PathBuf::from("/definitely/missing"));
        assert!(!source.is_available());
        assert!(source.sessions_for_day(&window()).unwrap().is_empty());
    }
}
