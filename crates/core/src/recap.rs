//! Merge/aggregation engine: group canonical sessions by project, join
//! externally supplied git activity, and roll everything up into one
//! day-level recap.

use crate::session::{Session, TokenUsage};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Bucket key for sessions whose project path did not resolve.
pub const UNKNOWN_PROJECT_KEY: &str = "unknown";

/// One commit, as reported by the external git collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct GitCommit {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author: String,
    pub timestamp_ms: i64,
    pub files_changed: u64,
    pub insertions: u64,
    pub deletions: u64,
    pub files: Vec<String>,
}

/// Git activity for one project directory on the target day. Produced
/// outside the core and joined in by project path.
#[derive(Debug, Clone, Serialize)]
pub struct GitActivity {
    pub project_path: PathBuf,
    pub project_name: String,
    pub commits: Vec<GitCommit>,
    pub insertions: u64,
    pub deletions: u64,
    pub files_changed: u64,
}

/// Aggregates shared by project summaries and the day-level rollup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivityTotals {
    pub sessions: u64,
    pub messages: u64,
    pub user_messages: u64,
    pub assistant_messages: u64,
    pub active_duration_ms: i64,
    pub cost_usd: f64,
    pub usage: TokenUsage,
    pub commits: u64,
}

impl ActivityTotals {
    fn add_session(&mut self, s: &Session) {
        self.sessions += 1;
        self.messages += s.message_count;
        self.user_messages += s.user_message_count;
        self.assistant_messages += s.assistant_message_count;
        self.active_duration_ms += s.active_duration_ms;
        self.cost_usd += s.cost_usd;
        self.usage.add(&s.usage);
    }
}

/// One project's share of the day: its sessions (borrowed, not copied),
/// optional git activity, aggregates, and a slot for generated prose.
#[derive(Debug, Serialize)]
pub struct ProjectSummary<'a> {
    /// `None` for the synthetic unknown-project bucket.
    pub path: Option<PathBuf>,
    pub name: String,
    pub sessions: Vec<&'a Session>,
    pub git: Option<GitActivity>,
    pub totals: ActivityTotals,
    /// Union of tool-call summaries, first-appearance order.
    pub tools_used: Vec<String>,
    pub models_used: Vec<String>,
    pub files_touched: Vec<String>,
    /// Externally generated prose; the engine never fills this.
    pub summary: Option<String>,
}

/// The whole-day result: projects sorted by cost descending (stable on
/// ties), plus global aggregates.
#[derive(Debug, Serialize)]
pub struct DayRecap<'a> {
    pub date: NaiveDate,
    pub projects: Vec<ProjectSummary<'a>>,
    pub totals: ActivityTotals,
    /// Token total over *all* input sessions, independent of bucket
    /// dropping, so it reflects everything that was parsed.
    pub total_tokens_all_sessions: u64,
    /// Externally generated standup message; the engine never fills this.
    pub standup: Option<String>,
}

/// Group sessions by resolved project path, join git activity by the same
/// path, drop buckets with no sessions and no commits, and aggregate.
pub fn build_recap<'a>(
    date: NaiveDate,
    sessions: &'a [Session],
    mut git: HashMap<PathBuf, GitActivity>,
) -> DayRecap<'a> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, ProjectSummary<'a>> = HashMap::new();

    for session in sessions {
        let key = session
            .project_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| UNKNOWN_PROJECT_KEY.to_string());
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            ProjectSummary {
                path: session.project_path.clone(),
                name: String::new(),
                sessions: Vec::new(),
                git: None,
                totals: ActivityTotals::default(),
                tools_used: Vec::new(),
                models_used: Vec::new(),
                files_touched: Vec::new(),
                summary: None,
            }
        });
        bucket.sessions.push(session);
        bucket.totals.add_session(session);
        union_into(&mut bucket.tools_used, &session.tool_calls);
        union_into(&mut bucket.models_used, &session.models);
        union_into(&mut bucket.files_touched, &session.files_touched);
    }

    // Join git activity; paths with commits but no sessions get their own
    // bucket so purely-manual work still shows up.
    let mut git_paths: Vec<PathBuf> = git.keys().cloned().collect();
    git_paths.sort();
    for path in git_paths {
        let Some(activity) = git.remove(&path) else {
            continue;
        };
        let key = path.display().to_string();
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            ProjectSummary {
                path: Some(path.clone()),
                name: String::new(),
                sessions: Vec::new(),
                git: None,
                totals: ActivityTotals::default(),
                tools_used: Vec::new(),
                models_used: Vec::new(),
                files_touched: Vec::new(),
                summary: None,
            }
        });
        bucket.totals.commits = activity.commits.len() as u64;
        bucket.git = Some(activity);
    }

    let mut projects: Vec<ProjectSummary<'a>> = Vec::new();
    for key in order {
        let Some(mut bucket) = buckets.remove(&key) else {
            continue;
        };
        let has_commits = bucket
            .git
            .as_ref()
            .is_some_and(|g| !g.commits.is_empty());
        if bucket.sessions.is_empty() && !has_commits {
            continue;
        }
        bucket.name = display_name(&bucket);
        projects.push(bucket);
    }

    // Descending by cost; Vec::sort_by is stable, so encounter order
    // breaks ties.
    projects.sort_by(|a, b| {
        b.totals
            .cost_usd
            .partial_cmp(&a.totals.cost_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut totals = ActivityTotals::default();
    for project in &projects {
        totals.sessions += project.totals.sessions;
        totals.messages += project.totals.messages;
        totals.user_messages += project.totals.user_messages;
        totals.assistant_messages += project.totals.assistant_messages;
        totals.active_duration_ms += project.totals.active_duration_ms;
        totals.cost_usd += project.totals.cost_usd;
        totals.usage.add(&project.totals.usage);
        totals.commits += project.totals.commits;
    }

    let total_tokens_all_sessions = sessions.iter().map(|s| s.usage.total).sum();

    DayRecap {
        date,
        projects,
        totals,
        total_tokens_all_sessions,
        standup: None,
    }
}

fn display_name(bucket: &ProjectSummary<'_>) -> String {
    if let Some(session) = bucket.sessions.first() {
        if !session.project_name.is_empty() {
            return session.project_name.clone();
        }
    }
    if let Some(ref git) = bucket.git {
        if !git.project_name.is_empty() {
            return git.project_name.clone();
        }
    }
    bucket
        .path
        .as_ref()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| "(unknown project)".to_string())
}

/// Append items not yet present, preserving first-appearance order.
fn union_into(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.iter().any(|existing| existing == item) {
            target.push(item.clone());
        }
    }
}
