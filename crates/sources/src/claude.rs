//! Claude Code storage: a per-project session index, an optional local
//! SQLite store, and per-session JSONL logs.
//!
//! The index (`projects/<dir>/sessions-index.json`) is the source of truth
//! for which sessions exist and when they were active. Message content is
//! read from the store (`__store.db`, assistant and user turn tables) when
//! it is present and has rows for the session, falling back to the
//! session's own JSONL file otherwise. Both paths deduplicate assistant
//! messages by message id keeping the last occurrence: later streamed
//! chunks are more complete than earlier ones.

use crate::common::{dedup_keep_last, home_dir, parse_timestamp_ms, read_json};
use crate::DaySource;
use anyhow::Result;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use serde_json::Value;
use standup_core::extract::{
    estimate_active_duration_ms, extract_file_paths, infer_title, summarize_tool_call,
    DigestBuilder,
};
use standup_core::project::resolve_project_path;
use standup_core::{pricing, DayWindow, Session, SourceTool, TokenUsage};
use std::io::BufRead;
use std::path::{Path, PathBuf};

pub struct ClaudeSource {
    root: PathBuf,
}

impl ClaudeSource {
    pub fn new() -> Self {
        let root = std::env::var("CLAUDE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".claude"));
        Self { root }
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    fn store_path(&self) -> PathBuf {
        self.root.join("__store.db")
    }
}

impl Default for ClaudeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DaySource for ClaudeSource {
    fn tool(&self) -> SourceTool {
        SourceTool::ClaudeCode
    }

    fn is_available(&self) -> bool {
        self.projects_dir().is_dir()
    }

    fn sessions_for_day(&self, window: &DayWindow) -> Result<Vec<Session>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }

        // The store handle lives exactly as long as this call.
        let store = open_store(&self.store_path());

        let mut sessions = Vec::new();
        let entries = match std::fs::read_dir(self.projects_dir()) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        for entry in entries.flatten() {
            let project_dir = entry.path();
            if !project_dir.is_dir() {
                continue;
            }
            let index_path = project_dir.join("sessions-index.json");
            let Some(index) = read_json::<SessionIndex>(&index_path) else {
                continue;
            };
            for meta in index.sessions {
                if meta.is_sidechain {
                    continue;
                }
                if !overlaps_window(&meta, window) {
                    continue;
                }
                if let Some(session) = build_session(&meta, &project_dir, store.as_ref(), window) {
                    sessions.push(session);
                }
            }
        }
        Ok(sessions)
    }
}

fn open_store(path: &Path) -> Option<Connection> {
    if !path.is_file() {
        return None;
    }
    match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => Some(conn),
        Err(e) => {
            tracing::debug!("Store unreadable, falling back to log files: {}", e);
            None
        }
    }
}

// ── Index shapes ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SessionIndex {
    #[serde(default)]
    sessions: Vec<SessionMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionMeta {
    id: String,
    /// Log file path, relative to the project directory or absolute.
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default, alias = "updatedAt")]
    last_activity_at: Option<String>,
    #[serde(default)]
    is_sidechain: bool,
}

fn overlaps_window(meta: &SessionMeta, window: &DayWindow) -> bool {
    let created = meta.created_at.as_deref().and_then(parse_timestamp_ms);
    let updated = meta
        .last_activity_at
        .as_deref()
        .and_then(parse_timestamp_ms);
    match (created, updated) {
        (Some(start), Some(end)) => window.overlaps(start, end.max(start)),
        (Some(start), None) => window.overlaps(start, i64::MAX),
        // Index without a range: let the message scan decide.
        _ => true,
    }
}

// ── Normalized message used by both read strategies ─────────────────────────

#[derive(Debug, Clone)]
struct Message {
    /// Stable per-message id for chunk dedup (assistant turns only).
    message_id: Option<String>,
    ts_ms: i64,
    role: &'static str,
    text: String,
    model: Option<String>,
    usage: TokenUsage,
    cost_usd: Option<f64>,
    tool_calls: Vec<String>,
    files: Vec<String>,
    /// Working directory of the record, a project-path candidate only.
    cwd: Option<String>,
}

fn build_session(
    meta: &SessionMeta,
    project_dir: &Path,
    store: Option<&Connection>,
    window: &DayWindow,
) -> Option<Session> {
    // Strategy 1: relational store. Strategy 2: the session's log file.
    // Each either yields usable messages or hands over to the next.
    let mut messages = store
        .and_then(|conn| read_store_messages(conn, &meta.id, window))
        .filter(|msgs| !msgs.is_empty())
        .unwrap_or_default();
    if messages.is_empty() {
        messages = read_log_messages(meta, project_dir, window);
    }
    if messages.is_empty() {
        return None;
    }

    messages.sort_by_key(|m| m.ts_ms);
    let messages = dedup_keep_last(messages, |m| m.message_id.clone());

    let ts: Vec<i64> = messages.iter().map(|m| m.ts_ms).collect();
    let mut digest = DigestBuilder::new();
    let mut usage = TokenUsage::default();
    let mut reported_cost = 0.0;
    let mut has_reported_cost = false;
    let mut models: Vec<String> = Vec::new();
    let mut tool_calls: Vec<String> = Vec::new();
    let mut files: Vec<String> = Vec::new();
    let mut user_count = 0u64;
    let mut assistant_count = 0u64;

    for msg in &messages {
        digest.push(msg.role, &msg.text);
        match msg.role {
            "user" => user_count += 1,
            _ => assistant_count += 1,
        }
        usage.add(&msg.usage);
        if let Some(cost) = msg.cost_usd {
            reported_cost += cost;
            has_reported_cost = true;
        }
        if let Some(ref model) = msg.model {
            if !models.iter().any(|m| m == model) {
                models.push(model.clone());
            }
        }
        for call in &msg.tool_calls {
            if !tool_calls.iter().any(|c| c == call) {
                tool_calls.push(call.clone());
            }
        }
        for file in &msg.files {
            if !files.iter().any(|f| f == file) {
                files.push(file.clone());
            }
        }
    }

    let cost_usd = if has_reported_cost {
        reported_cost
    } else {
        pricing::estimate_cost(models.first().map(String::as_str).unwrap_or(""), &usage)
    };

    let mut candidates: Vec<String> = Vec::new();
    if let Some(ref cwd) = meta.cwd {
        candidates.push(cwd.clone());
    }
    for msg in &messages {
        if let Some(ref cwd) = msg.cwd {
            if !candidates.iter().any(|c| c == cwd) {
                candidates.push(cwd.clone());
            }
        }
    }
    candidates.extend(files.iter().cloned());

    let mut session = Session::new(meta.id.clone(), SourceTool::ClaudeCode);
    session.project_path = resolve_project_path(&candidates);
    session.derive_project_name();
    session.start_ms = window.clamp(*ts.iter().min()?);
    session.end_ms = window.clamp(*ts.iter().max()?);
    session.active_duration_ms = estimate_active_duration_ms(&ts);
    session.title = infer_title(
        messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| m.text.as_str()),
    );
    session.digest = digest.finish();
    session.tool_calls = tool_calls;
    session.files_touched = files;
    session.user_message_count = user_count;
    session.assistant_message_count = assistant_count;
    session.message_count = user_count + assistant_count;
    session.usage = usage;
    session.cost_usd = cost_usd;
    session.models = models;
    Some(session)
}

// ── Strategy 1: the relational store ────────────────────────────────────────

/// Read one session's turns from the two-table store, windowed by
/// timestamp. Any SQL error (missing tables, schema drift) yields `None`
/// so the caller falls back to the log file.
fn read_store_messages(
    conn: &Connection,
    session_id: &str,
    window: &DayWindow,
) -> Option<Vec<Message>> {
    let mut messages = Vec::new();

    let assistant = conn
        .prepare(
            "SELECT message_id, timestamp_ms, model, cost_usd, input_tokens, output_tokens, \
             cache_read_tokens, cache_creation_tokens, content \
             FROM assistant_messages \
             WHERE session_id = ?1 AND timestamp_ms BETWEEN ?2 AND ?3 \
             ORDER BY timestamp_ms",
        )
        .and_then(|mut stmt| {
            let rows = stmt.query_map(
                rusqlite::params![session_id, window.start_ms, window.end_ms],
                |row| {
                    let mut usage = TokenUsage {
                        input: row.get::<_, Option<i64>>(4)?.unwrap_or(0).max(0) as u64,
                        output: row.get::<_, Option<i64>>(5)?.unwrap_or(0).max(0) as u64,
                        reasoning: 0,
                        cache_read: row.get::<_, Option<i64>>(6)?.unwrap_or(0).max(0) as u64,
                        cache_write: row.get::<_, Option<i64>>(7)?.unwrap_or(0).max(0) as u64,
                        total: 0,
                    };
                    usage.recompute_total();
                    Ok(Message {
                        message_id: row.get(0)?,
                        ts_ms: row.get(1)?,
                        role: "assistant",
                        text: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                        model: row.get(2)?,
                        usage,
                        cost_usd: row.get(3)?,
                        tool_calls: Vec::new(),
                        files: Vec::new(),
                        cwd: None,
                    })
                },
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        });
    match assistant {
        Ok(rows) => messages.extend(rows),
        Err(e) => {
            tracing::debug!("Store query failed for {}: {}", session_id, e);
            return None;
        }
    }

    let user = conn
        .prepare(
            "SELECT timestamp_ms, content FROM user_messages \
             WHERE session_id = ?1 AND timestamp_ms BETWEEN ?2 AND ?3 \
             ORDER BY timestamp_ms",
        )
        .and_then(|mut stmt| {
            let rows = stmt.query_map(
                rusqlite::params![session_id, window.start_ms, window.end_ms],
                |row| {
                    Ok(Message {
                        message_id: None,
                        ts_ms: row.get(0)?,
                        role: "user",
                        text: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        model: None,
                        usage: TokenUsage::default(),
                        cost_usd: None,
                        tool_calls: Vec::new(),
                        files: Vec::new(),
                        cwd: None,
                    })
                },
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        });
    match user {
        Ok(rows) => messages.extend(rows),
        Err(e) => {
            tracing::debug!("Store query failed for {}: {}", session_id, e);
            return None;
        }
    }

    Some(messages)
}

// ── Strategy 2: the session's own JSONL log ─────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLogLine {
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    is_sidechain: bool,
    #[serde(default)]
    message: Value,
    #[serde(default, rename = "costUSD")]
    cost_usd: Option<f64>,
}

fn read_log_messages(meta: &SessionMeta, project_dir: &Path, window: &DayWindow) -> Vec<Message> {
    let Some(path) = log_file_path(meta, project_dir) else {
        return Vec::new();
    };
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!("Skipping unreadable session log {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let mut messages = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawLogLine = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if raw.is_sidechain {
            continue;
        }
        let Some(ts_ms) = raw.timestamp.as_deref().and_then(parse_timestamp_ms) else {
            continue;
        };
        if !window.contains(ts_ms) {
            continue;
        }
        match raw.entry_type.as_str() {
            "user" => {
                let text = message_text(&raw.message);
                if text.is_empty() {
                    continue;
                }
                messages.push(Message {
                    message_id: None,
                    ts_ms,
                    role: "user",
                    text,
                    model: None,
                    usage: TokenUsage::default(),
                    cost_usd: None,
                    tool_calls: Vec::new(),
                    files: Vec::new(),
                    // Path resolution sees the cwd even when the index
                    // lacks one; it never counts as a touched file.
                    cwd: raw.cwd,
                });
            }
            "assistant" => {
                let mut tool_calls = Vec::new();
                let mut files = Vec::new();
                collect_tool_uses(&raw.message, &mut tool_calls, &mut files);
                let text = message_text(&raw.message);
                if text.is_empty() && tool_calls.is_empty() {
                    continue;
                }
                messages.push(Message {
                    message_id: raw
                        .message
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    ts_ms,
                    role: "assistant",
                    text,
                    model: raw
                        .message
                        .get("model")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    usage: message_usage(&raw.message),
                    cost_usd: raw.cost_usd,
                    tool_calls,
                    files,
                    cwd: raw.cwd,
                });
            }
            _ => {}
        }
    }
    messages
}

fn log_file_path(meta: &SessionMeta, project_dir: &Path) -> Option<PathBuf> {
    match meta.path.as_deref() {
        Some(p) if p.starts_with('/') => Some(PathBuf::from(p)),
        Some(p) => Some(project_dir.join(p)),
        None => {
            let fallback = project_dir.join(format!("{}.jsonl", meta.id));
            fallback.is_file().then_some(fallback)
        }
    }
}

/// Message content is either a bare string or an array of typed blocks.
fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| {
                if b.get("type").and_then(Value::as_str) == Some("text") {
                    b.get("text").and_then(Value::as_str)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn collect_tool_uses(message: &Value, tool_calls: &mut Vec<String>, files: &mut Vec<String>) {
    let Some(blocks) = message.get("content").and_then(Value::as_array) else {
        return;
    };
    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("tool_use") {
            continue;
        }
        let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
        let empty = Value::Null;
        let input = block.get("input").unwrap_or(&empty);
        let summary = summarize_tool_call(name, input);
        if !tool_calls.iter().any(|c| c == &summary) {
            tool_calls.push(summary);
        }
        extract_file_paths(input, files);
    }
}

fn message_usage(message: &Value) -> TokenUsage {
    let Some(raw) = message.get("usage") else {
        return TokenUsage::default();
    };
    let field = |name: &str| raw.get(name).and_then(Value::as_u64).unwrap_or(0);
    let mut usage = TokenUsage {
        input: field("input_tokens"),
        output: field("output_tokens"),
        reasoning: 0,
        cache_read: field("cache_read_input_tokens"),
        cache_write: field("cache_creation_input_tokens"),
        total: 0,
    };
    usage.recompute_total();
    usage
}
