//! opencode directory-tree storage.
//!
//! Layout:
//!   storage/session/<project_hash>/<session_id>.json   session info
//!   storage/message/<session_id>/<msg_id>.json         message envelopes
//!   storage/part/<msg_id>/<part_id>.json               text/tool/patch parts
//!
//! Sessions with a parent id are sub-agent runs: they never surface as
//! sessions of their own, but their in-window messages fold into the
//! parent's totals. Token counts here are per-message, not cumulative,
//! so they sum directly, and each message carries its own reported cost.

use crate::common::{home_dir, read_json};
use crate::DaySource;
use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use standup_core::extract::{
    estimate_active_duration_ms, extract_file_paths, infer_title, summarize_tool_call,
    DigestBuilder,
};
use standup_core::project::resolve_project_path;
use standup_core::{DayWindow, Session, SourceTool, TokenUsage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct OpencodeSource {
    root: PathBuf,
}

impl OpencodeSource {
    pub fn new() -> Self {
        let root = std::env::var("OPENCODE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".local/share/opencode"));
        Self { root }
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    fn storage_dir(&self) -> PathBuf {
        self.root.join("storage")
    }
}

impl Default for OpencodeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DaySource for OpencodeSource {
    fn tool(&self) -> SourceTool {
        SourceTool::Opencode
    }

    fn is_available(&self) -> bool {
        self.storage_dir().join("session").is_dir()
    }

    fn sessions_for_day(&self, window: &DayWindow) -> Result<Vec<Session>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }
        let storage = self.storage_dir();
        let infos = read_session_infos(&storage.join("session"));

        // Children fold into their parents; they are never sessions of
        // their own, even when the parent has no activity today.
        let mut children: HashMap<String, Vec<&SessionInfo>> = HashMap::new();
        for info in &infos {
            if let Some(parent) = info.parent_id() {
                children.entry(parent.to_string()).or_default().push(info);
            }
        }

        let mut sessions = Vec::new();
        for info in infos.iter().filter(|i| i.parent_id().is_none()) {
            if !info_overlaps(info, window)
                && !children
                    .get(&info.id)
                    .is_some_and(|kids| kids.iter().any(|k| info_overlaps(k, window)))
            {
                continue;
            }
            let mut turns = read_turns(&storage, &info.id, window);
            for child in children.get(&info.id).map(Vec::as_slice).unwrap_or(&[]) {
                turns.extend(read_turns(&storage, &child.id, window));
            }
            if let Some(session) = build_session(info, turns, window) {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

// ── Storage shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "parentID", alias = "parentId")]
    parent_id: Option<String>,
    #[serde(default)]
    time: Option<TimeRange>,
    #[serde(default)]
    directory: Option<String>,
}

impl SessionInfo {
    fn parent_id(&self) -> Option<&str> {
        self.parent_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != self.id)
    }
}

#[derive(Debug, Deserialize)]
struct TimeRange {
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    updated: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageInfo {
    id: String,
    role: String,
    #[serde(default, rename = "modelID", alias = "modelId")]
    model_id: Option<String>,
    #[serde(default)]
    time: Option<MessageTime>,
    #[serde(default)]
    cost: Option<f64>,
    #[serde(default)]
    tokens: Option<RawTokens>,
}

#[derive(Debug, Deserialize)]
struct MessageTime {
    #[serde(default)]
    created: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawTokens {
    #[serde(default)]
    input: Option<u64>,
    #[serde(default)]
    output: Option<u64>,
    #[serde(default)]
    reasoning: Option<u64>,
    #[serde(default)]
    cache: Option<RawCacheTokens>,
}

#[derive(Debug, Deserialize)]
struct RawCacheTokens {
    #[serde(default)]
    read: Option<u64>,
    #[serde(default)]
    write: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartInfo {
    #[serde(rename = "type")]
    part_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    state: Option<ToolState>,
    #[serde(default)]
    files: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ToolState {
    #[serde(default)]
    input: Option<Value>,
}

fn info_overlaps(info: &SessionInfo, window: &DayWindow) -> bool {
    match info.time.as_ref() {
        Some(time) => {
            let start = time.created.unwrap_or(i64::MIN);
            let end = time.updated.unwrap_or(i64::MAX).max(start);
            window.overlaps(start, end)
        }
        // No recorded range: the message scan decides.
        None => true,
    }
}

fn read_session_infos(session_root: &Path) -> Vec<SessionInfo> {
    let mut infos = Vec::new();
    let Ok(hash_dirs) = std::fs::read_dir(session_root) else {
        return infos;
    };
    for hash_dir in hash_dirs.flatten() {
        let Ok(entries) = std::fs::read_dir(hash_dir.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(info) = read_json::<SessionInfo>(&path) {
                    infos.push(info);
                }
            }
        }
    }
    infos
}

// ── Turn assembly ───────────────────────────────────────────────────────────

struct Turn {
    ts_ms: i64,
    role: String,
    text: String,
    model: Option<String>,
    usage: TokenUsage,
    cost_usd: f64,
    tool_calls: Vec<String>,
    files: Vec<String>,
}

fn read_turns(storage: &Path, session_id: &str, window: &DayWindow) -> Vec<Turn> {
    let message_dir = storage.join("message").join(session_id);
    let Ok(entries) = std::fs::read_dir(&message_dir) else {
        return Vec::new();
    };

    let mut turns = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.extension().is_some_and(|e| e == "json") {
            continue;
        }
        let Some(msg) = read_json::<MessageInfo>(&path) else {
            continue;
        };
        let Some(ts_ms) = msg.time.as_ref().and_then(|t| t.created) else {
            continue;
        };
        if !window.contains(ts_ms) {
            continue;
        }
        if msg.role != "user" && msg.role != "assistant" {
            continue;
        }

        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls = Vec::new();
        let mut files = Vec::new();
        for part in read_parts(storage, &msg.id) {
            match part.part_type.as_str() {
                "text" => {
                    if let Some(text) = part.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
                    {
                        text_parts.push(text.to_string());
                    }
                }
                "tool" => {
                    let name = part.tool.as_deref().unwrap_or("tool");
                    let input = part
                        .state
                        .as_ref()
                        .and_then(|s| s.input.clone())
                        .unwrap_or(Value::Null);
                    tool_calls.push(summarize_tool_call(name, &input));
                    extract_file_paths(&input, &mut files);
                }
                "patch" => {
                    for file in part.files.as_deref().unwrap_or(&[]) {
                        let trimmed = file.trim();
                        if !trimmed.is_empty() {
                            files.push(trimmed.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        let usage = msg
            .tokens
            .as_ref()
            .map(|t| {
                let mut usage = TokenUsage {
                    input: t.input.unwrap_or(0),
                    output: t.output.unwrap_or(0),
                    reasoning: t.reasoning.unwrap_or(0),
                    cache_read: t.cache.as_ref().and_then(|c| c.read).unwrap_or(0),
                    cache_write: t.cache.as_ref().and_then(|c| c.write).unwrap_or(0),
                    total: 0,
                };
                usage.recompute_total();
                usage
            })
            .unwrap_or_default();

        let text = text_parts.join("\n");
        if text.is_empty() && tool_calls.is_empty() && usage.is_empty() {
            continue;
        }
        turns.push(Turn {
            ts_ms,
            role: msg.role,
            text,
            model: msg.model_id,
            usage,
            cost_usd: msg.cost.unwrap_or(0.0),
            tool_calls,
            files,
        });
    }
    turns
}

fn read_parts(storage: &Path, message_id: &str) -> Vec<PartInfo> {
    let Some(dir) = part_dir_for_message(&storage.join("part"), message_id) else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut parts = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "json") {
            if let Some(part) = read_json::<PartInfo>(&path) {
                parts.push(part);
            }
        }
    }
    parts
}

/// Part directories are usually named after the message id verbatim, but
/// some versions strip or add the `msg_` prefix.
fn part_dir_for_message(part_base: &Path, message_id: &str) -> Option<PathBuf> {
    let direct = part_base.join(message_id);
    if direct.is_dir() {
        return Some(direct);
    }
    let alternate = match message_id.strip_prefix("msg_") {
        Some(trimmed) => part_base.join(trimmed),
        None => part_base.join(format!("msg_{message_id}")),
    };
    alternate.is_dir().then_some(alternate)
}

fn build_session(info: &SessionInfo, mut turns: Vec<Turn>, window: &DayWindow) -> Option<Session> {
    if turns.is_empty() {
        return None;
    }
    turns.sort_by_key(|t| t.ts_ms);

    let ts: Vec<i64> = turns.iter().map(|t| t.ts_ms).collect();
    let mut digest = DigestBuilder::new();
    let mut usage = TokenUsage::default();
    let mut cost_usd = 0.0;
    let mut models: Vec<String> = Vec::new();
    let mut tool_calls: Vec<String> = Vec::new();
    let mut files: Vec<String> = Vec::new();
    let mut user_count = 0u64;
    let mut assistant_count = 0u64;

    for turn in &turns {
        digest.push(&turn.role, &turn.text);
        match turn.role.as_str() {
            "user" => user_count += 1,
            _ => assistant_count += 1,
        }
        usage.add(&turn.usage);
        cost_usd += turn.cost_usd;
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

    let mut candidates: Vec<String> = Vec::new();
    if let Some(ref dir) = info.directory {
        candidates.push(dir.clone());
    }
    candidates.extend(files.iter().cloned());

    let mut session = Session::new(info.id.clone(), SourceTool::Opencode);
    session.project_path = resolve_project_path(&candidates);
    session.derive_project_name();
    session.start_ms = window.clamp(*ts.iter().min()?);
    session.end_ms = window.clamp(*ts.iter().max()?);
    session.active_duration_ms = estimate_active_duration_ms(&ts);
    session.title = info.title.clone().filter(|t| !t.trim().is_empty());
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
    session.usage = usage;
    session.cost_usd = cost_usd;
    session.models = models;
    Some(session)
}
