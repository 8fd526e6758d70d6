//! Cursor composer storage: a SQLite key-value table (`cursorDiskKV`)
//! holding one `composerData:<id>` JSON document per conversation.
//!
//! Two on-disk generations coexist. Older documents carry the full
//! conversation inline as a `conversation` array of bubbles. Version 3
//! documents (`_v >= 3`) store only bubble headers inline and keep each
//! bubble under its own `bubbleId:<composerId>:<bubbleId>` key, so the
//! conversation is reassembled in header order. Composer-level
//! `createdAt`/`lastUpdatedAt` are checked against the day window before
//! any bubble is fetched.

use crate::common::{dedup_keep_last, home_dir, numeric_timestamp_ms, parse_timestamp_ms};
use crate::DaySource;
use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use serde_json::Value;
use standup_core::extract::{
    estimate_active_duration_ms, extract_file_paths, infer_title, summarize_tool_call,
    DigestBuilder,
};
use standup_core::project::{collect_path_candidates, resolve_project_path};
use standup_core::{pricing, DayWindow, Session, SourceTool, TokenUsage};
use std::collections::HashMap;
use std::path::PathBuf;

pub struct CursorSource {
    db_path: Option<PathBuf>,
}

impl CursorSource {
    pub fn new() -> Self {
        let db_path = std::env::var("CURSOR_STATE_DB")
            .map(PathBuf::from)
            .ok()
            .or_else(default_db_path);
        Self { db_path }
    }

    pub fn with_db(db_path: PathBuf) -> Self {
        Self {
            db_path: Some(db_path),
        }
    }
}

impl Default for CursorSource {
    fn default() -> Self {
        Self::new()
    }
}

fn default_db_path() -> Option<PathBuf> {
    let home = home_dir();
    let candidates = [
        home.join(".config/Cursor/User/globalStorage/state.vscdb"),
        home.join("Library/Application Support/Cursor/User/globalStorage/state.vscdb"),
    ];
    candidates.into_iter().find(|p| p.is_file())
}

impl DaySource for CursorSource {
    fn tool(&self) -> SourceTool {
        SourceTool::Cursor
    }

    fn is_available(&self) -> bool {
        self.db_path.as_deref().is_some_and(|p| p.is_file())
    }

    fn sessions_for_day(&self, window: &DayWindow) -> Result<Vec<Session>> {
        let Some(path) = self.db_path.as_deref().filter(|p| p.is_file()) else {
            return Ok(Vec::new());
        };
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed to open Cursor state db: {}", path.display()))?;
        if !table_exists(&conn, "cursorDiskKV") {
            tracing::debug!("No cursorDiskKV table in {}", path.display());
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for (key, value) in read_kv_prefix(&conn, "composerData:")? {
            let composer: RawComposerData = match serde_json::from_str(&value) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!("Skipping unparseable composerData entry {}: {}", key, e);
                    continue;
                }
            };
            // Cheap metadata check before fetching any bubbles.
            if !composer_overlaps(&composer, window) {
                continue;
            }
            let bubbles = load_bubbles(&conn, &composer)?;
            if let Some(session) = build_session(&composer, &value, bubbles, window) {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

// ── Raw composerData shapes ─────────────────────────────────────────────────

/// Timestamps are integers in some Cursor versions and ISO strings in
/// others.
mod string_or_number {
    use serde::{self, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrNumber {
            String(String),
            Integer(i64),
            Float(f64),
        }

        match Option::<StringOrNumber>::deserialize(deserializer)? {
            Some(StringOrNumber::String(s)) => Ok(Some(s)),
            Some(StringOrNumber::Integer(n)) => Ok(Some(n.to_string())),
            Some(StringOrNumber::Float(n)) => Ok(Some(n.to_string())),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawComposerData {
    composer_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number::deserialize")]
    created_at: Option<String>,
    #[serde(default, deserialize_with = "string_or_number::deserialize")]
    last_updated_at: Option<String>,
    #[serde(default)]
    conversation: Vec<Value>,
    #[serde(default, rename = "_v")]
    version: Option<u64>,
    #[serde(default)]
    full_conversation_headers_only: Option<Vec<RawBubbleHeader>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBubbleHeader {
    bubble_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBubble {
    /// 1 = user, 2 = assistant. Absent means the row is not a
    /// conversation bubble at all.
    #[serde(rename = "type")]
    bubble_type: Option<u8>,
    #[serde(default)]
    bubble_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool_former_data: Option<RawToolFormerData>,
    #[serde(default)]
    timing_info: Option<RawTimingInfo>,
    #[serde(default, deserialize_with = "string_or_number::deserialize")]
    created_at: Option<String>,
    #[serde(default)]
    model_type: Option<String>,
    #[serde(default)]
    token_count: Option<RawTokenCount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolFormerData {
    #[serde(default)]
    name: Option<String>,
    /// Tool arguments as a JSON-encoded string.
    #[serde(default)]
    raw_args: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTimingInfo {
    #[serde(default)]
    client_start_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenCount {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

fn composer_overlaps(composer: &RawComposerData, window: &DayWindow) -> bool {
    let created = composer.created_at.as_deref().and_then(parse_timestamp_ms);
    let updated = composer
        .last_updated_at
        .as_deref()
        .and_then(parse_timestamp_ms);
    match (created, updated) {
        (Some(start), Some(end)) => window.overlaps(start, end.max(start)),
        (Some(start), None) => window.overlaps(start, i64::MAX),
        (None, Some(end)) => window.overlaps(i64::MIN, end),
        // No metadata range: the per-bubble timestamps decide.
        (None, None) => true,
    }
}

// ── KV reads ────────────────────────────────────────────────────────────────

fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )
    .unwrap_or(false)
}

/// Values are TEXT in some Cursor versions and BLOB in others.
fn read_kv_prefix(conn: &Connection, prefix: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM cursorDiskKV WHERE key LIKE ?1")?;
    let rows = stmt.query_map([format!("{prefix}%")], |row| {
        let key: String = row.get(0)?;
        let value = match row.get_ref(1)? {
            rusqlite::types::ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            rusqlite::types::ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            _ => String::new(),
        };
        Ok((key, value))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Produce the composer's bubbles as raw JSON values, in conversation
/// order. Version 3 documents are reassembled from their own
/// `bubbleId:<composerId>:*` keys following the inline header list;
/// older documents carry the bubbles inline.
fn load_bubbles(conn: &Connection, composer: &RawComposerData) -> Result<Vec<Value>> {
    let headers = match (&composer.version, &composer.full_conversation_headers_only) {
        (Some(v), Some(headers)) if *v >= 3 => headers,
        _ => return Ok(composer.conversation.clone()),
    };

    let prefix = format!("bubbleId:{}:", composer.composer_id);
    let mut by_id: HashMap<String, Value> = HashMap::new();
    for (key, value) in read_kv_prefix(conn, &prefix)? {
        let Some(bubble_id) = key.strip_prefix(&prefix) else {
            continue;
        };
        match serde_json::from_str(&value) {
            Ok(parsed) => {
                by_id.insert(bubble_id.to_string(), parsed);
            }
            Err(e) => {
                tracing::debug!("Skipping unparseable bubble {}: {}", key, e);
            }
        }
    }

    Ok(headers
        .iter()
        .filter_map(|h| by_id.remove(&h.bubble_id))
        .collect())
}

// ── Session assembly ────────────────────────────────────────────────────────

struct Turn {
    bubble_id: Option<String>,
    ts_ms: i64,
    role: &'static str,
    text: String,
    model: Option<String>,
    usage: TokenUsage,
    tool_calls: Vec<String>,
    files: Vec<String>,
}

fn build_session(
    composer: &RawComposerData,
    composer_raw: &str,
    bubbles: Vec<Value>,
    window: &DayWindow,
) -> Option<Session> {
    let mut turns: Vec<Turn> = Vec::new();
    // Timestamp-less bubbles inherit their predecessor's time so order
    // within the conversation is preserved.
    let mut last_ts = window.start_ms;
    let mut path_candidates: Vec<String> = Vec::new();

    for raw in &bubbles {
        collect_path_candidates(raw, &mut path_candidates);
        let bubble: RawBubble = match serde_json::from_value(raw.clone()) {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(
                    "Skipping malformed bubble in composer {}: {}",
                    composer.composer_id,
                    e
                );
                continue;
            }
        };
        // No role tag means this row is checkpoint or metadata, not a turn.
        let role = match bubble.bubble_type {
            Some(1) => "user",
            Some(2) => "assistant",
            _ => continue,
        };

        let own_ts = bubble
            .timing_info
            .as_ref()
            .and_then(|t| t.client_start_time)
            .map(numeric_timestamp_ms)
            .or_else(|| bubble.created_at.as_deref().and_then(parse_timestamp_ms));
        let ts_ms = match own_ts {
            Some(ts) => {
                last_ts = ts;
                if !window.contains(ts) {
                    continue;
                }
                ts
            }
            // A missing timestamp alone never excludes a turn: it rides
            // at its predecessor's time, clamped into the day.
            None => window.clamp(last_ts),
        };

        let mut tool_calls = Vec::new();
        let mut files = Vec::new();
        if let Some(ref tool) = bubble.tool_former_data {
            let name = tool.name.as_deref().unwrap_or("tool");
            let args: Value = tool
                .raw_args
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(Value::Null);
            tool_calls.push(summarize_tool_call(name, &args));
            extract_file_paths(&args, &mut files);
        }

        let text = bubble.text.unwrap_or_default();
        if text.trim().is_empty() && tool_calls.is_empty() {
            continue;
        }

        let mut usage = TokenUsage::default();
        if let Some(ref count) = bubble.token_count {
            usage.input = count.input_tokens.unwrap_or(0);
            usage.output = count.output_tokens.unwrap_or(0);
            usage.recompute_total();
        }

        turns.push(Turn {
            bubble_id: bubble.bubble_id,
            ts_ms,
            role,
            text,
            model: bubble.model_type,
            usage,
            tool_calls,
            files,
        });
    }

    if turns.is_empty() {
        return None;
    }

    let turns = dedup_keep_last(turns, |t| t.bubble_id.clone());

    let ts: Vec<i64> = turns.iter().map(|t| t.ts_ms).collect();
    let mut digest = DigestBuilder::new();
    let mut usage = TokenUsage::default();
    let mut models: Vec<String> = Vec::new();
    let mut tool_calls: Vec<String> = Vec::new();
    let mut files: Vec<String> = Vec::new();
    let mut user_count = 0u64;
    let mut assistant_count = 0u64;

    for turn in &turns {
        digest.push(turn.role, &turn.text);
        match turn.role {
            "user" => user_count += 1,
            _ => assistant_count += 1,
        }
        usage.add(&turn.usage);
        if let Some(ref model) = turn.model {
            if !models.iter().any(|m| m == model) {
                models.push(model.clone());
            }
        }
        for call in &turn.tool_calls {
            if !tool_calls.iter().any(|c| c == call) {
                tool_calls.push(call.clone());
            }
        }
        for file in &turn.files {
            if !files.iter().any(|f| f == file) {
                files.push(file.clone());
            }
        }
    }

    // The composer document itself often names the workspace even when no
    // bubble does.
    if let Ok(composer_value) = serde_json::from_str::<Value>(composer_raw) {
        collect_path_candidates(&composer_value, &mut path_candidates);
    }
    path_candidates.extend(files.iter().cloned());

    let mut session = Session::new(composer.composer_id.clone(), SourceTool::Cursor);
    session.project_path = resolve_project_path(&path_candidates);
    session.derive_project_name();
    session.start_ms = window.clamp(*ts.iter().min()?);
    session.end_ms = window.clamp(*ts.iter().max()?);
    session.active_duration_ms = estimate_active_duration_ms(&ts);
    session.title = composer.name.clone().filter(|n| !n.trim().is_empty());
    if session.title.is_none() {
        session.title = infer_title(
            turns
                .iter()
                .filter(|t| t.role == "user")
                .map(|t| t.text.as_str()),
        );
    }
    session.digest = digest.finish();
    session.tool_calls = tool_calls;
    session.files_touched = files;
    session.user_message_count = user_count;
    session.assistant_message_count = assistant_count;
    session.message_count = user_count + assistant_count;
    session.cost_usd = pricing::estimate_cost(
        models.first().map(String::as_str).unwrap_or(""),
        &usage,
    );
    session.usage = usage;
    session.models = models;
    Some(session)
}
