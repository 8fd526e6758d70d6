pub mod claude;
pub mod codex;
pub(crate) mod common;
pub mod cursor;
pub mod opencode;

use anyhow::Result;
use standup_core::{DayWindow, Session, SourceTool};

/// One tool's local storage, read for a single day.
///
/// Implementations own discovery of their storage root and all
/// format-specific parsing. A missing root is not an error: it reports
/// unavailable and contributes zero sessions.
pub trait DaySource {
    fn tool(&self) -> SourceTool;

    /// Whether the tool's storage root exists on this machine.
    fn is_available(&self) -> bool;

    /// All canonical sessions with activity inside the day window.
    /// Individual corrupt files or rows are skipped, never fatal.
    fn sessions_for_day(&self, window: &DayWindow) -> Result<Vec<Session>>;
}

/// Every supported source, in a fixed order.
pub fn all_sources() -> Vec<Box<dyn DaySource>> {
    vec![
        Box::new(claude::ClaudeSource::new()),
        Box::new(codex::CodexSource::new()),
        Box::new(cursor::CursorSource::new()),
        Box::new(opencode::OpencodeSource::new()),
    ]
}
