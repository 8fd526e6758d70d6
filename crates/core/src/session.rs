use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The tools whose local storage we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceTool {
    ClaudeCode,
    Codex,
    Cursor,
    Opencode,
}

impl SourceTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Codex => "codex",
            Self::Cursor => "cursor",
            Self::Opencode => "opencode",
        }
    }
}

impl std::fmt::Display for SourceTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counts for one session (or one aggregate), already scoped to the
/// day window by the producing parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    /// Sum of the five components unless the source reports its own total
    /// (the per-source parsers document when they do).
    pub total: u64,
}

impl TokenUsage {
    pub fn recompute_total(&mut self) {
        self.total = self.input + self.output + self.reasoning + self.cache_read + self.cache_write;
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.reasoning += other.reasoning;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
        self.total += other.total;
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// One normalized conversation, clipped to the target day.
///
/// Every field here is already windowed: timestamps are clamped, counts and
/// usage cover only in-window activity. A parser never constructs a session
/// with zero in-window messages; it returns nothing instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Source-native id, or derived from the file name when absent.
    pub id: String,
    pub source: SourceTool,
    /// Resolved absolute project directory, if any candidate resolved.
    pub project_path: Option<PathBuf>,
    /// Display name derived from the project path (or a best-effort label).
    pub project_name: String,
    /// First in-window activity, epoch ms, clamped to the day window.
    pub start_ms: i64,
    /// Last in-window activity, epoch ms, clamped to the day window.
    pub end_ms: i64,
    /// Gap-capped active-duration estimate, not wall-clock span.
    pub active_duration_ms: i64,
    pub title: Option<String>,
    /// Role-tagged conversation digest, capped in size.
    pub digest: String,
    /// Unique human-readable tool-call summaries, first-appearance order.
    pub tool_calls: Vec<String>,
    /// Unique file paths touched by tool invocations.
    pub files_touched: Vec<String>,
    pub message_count: u64,
    pub user_message_count: u64,
    pub assistant_message_count: u64,
    pub usage: TokenUsage,
    /// Source-reported cost when the tool records one, estimated otherwise.
    pub cost_usd: f64,
    /// Unique model identifiers seen in assistant turns.
    pub models: Vec<String>,
}

impl Session {
    pub fn new(id: String, source: SourceTool) -> Self {
        Self {
            id,
            source,
            project_path: None,
            project_name: String::new(),
            start_ms: 0,
            end_ms: 0,
            active_duration_ms: 0,
            title: None,
            digest: String::new(),
            tool_calls: Vec::new(),
            files_touched: Vec::new(),
            message_count: 0,
            user_message_count: 0,
            assistant_message_count: 0,
            usage: TokenUsage::default(),
            cost_usd: 0.0,
            models: Vec::new(),
        }
    }

    /// Derive the display name from the resolved path's final segment.
    pub fn derive_project_name(&mut self) {
        if let Some(ref path) = self.project_path {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                self.project_name = name.to_string();
            }
        }
        if self.project_name.is_empty() {
            self.project_name = "(unknown project)".to_string();
        }
    }
}
