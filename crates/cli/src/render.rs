//! Terminal and JSON rendering of the day recap.

use anyhow::Result;
use standup_core::{DayRecap, ProjectSummary, TokenUsage};
use std::fmt::Write;

pub fn render_json(recap: &DayRecap) -> Result<String> {
    Ok(serde_json::to_string_pretty(recap)?)
}

pub fn render_human(recap: &DayRecap) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Recap for {}", recap.date.format("%A, %B %-d %Y"));
    let _ = writeln!(out);

    if recap.projects.is_empty() {
        let _ = writeln!(out, "No AI coding activity or commits found.");
        return out;
    }

    for project in &recap.projects {
        render_project(&mut out, project);
    }

    let _ = writeln!(out, "{}", "─".repeat(52));
    let _ = writeln!(
        out,
        "Total: {} session{} · {} messages · {} active · {}",
        recap.totals.sessions,
        plural(recap.totals.sessions),
        recap.totals.messages,
        format_duration(recap.totals.active_duration_ms),
        format_cost(recap.totals.cost_usd),
    );
    let _ = writeln!(
        out,
        "Tokens: {} ({} across all parsed sessions)",
        format_tokens(recap.totals.usage.total),
        format_tokens(recap.total_tokens_all_sessions),
    );
    if recap.totals.commits > 0 {
        let _ = writeln!(
            out,
            "Commits: {} across {} project{}",
            recap.totals.commits,
            recap.projects.iter().filter(|p| p.git.is_some()).count(),
            plural(recap.projects.iter().filter(|p| p.git.is_some()).count() as u64),
        );
    }

    if let Some(ref standup) = recap.standup {
        let _ = writeln!(out);
        let _ = writeln!(out, "Standup:");
        let _ = writeln!(out, "{standup}");
    }

    out
}

fn render_project(out: &mut String, project: &ProjectSummary) {
    let _ = writeln!(out, "▌ {}", project.name);
    if let Some(ref path) = project.path {
        let _ = writeln!(out, "  {}", path.display());
    }

    if project.totals.sessions > 0 {
        let _ = writeln!(
            out,
            "  {} session{} · {} messages · {} active · {}",
            project.totals.sessions,
            plural(project.totals.sessions),
            project.totals.messages,
            format_duration(project.totals.active_duration_ms),
            format_cost(project.totals.cost_usd),
        );
        let _ = writeln!(out, "  tokens: {}", format_usage(&project.totals.usage));
        if !project.models_used.is_empty() {
            let _ = writeln!(out, "  models: {}", project.models_used.join(", "));
        }
    }

    for session in &project.sessions {
        if let Some(ref title) = session.title {
            let _ = writeln!(
                out,
                "  - [{}] {}",
                session.source.as_str(),
                title
            );
        } else {
            let _ = writeln!(
                out,
                "  - [{}] {} messages",
                session.source.as_str(),
                session.message_count
            );
        }
    }

    if let Some(ref git) = project.git {
        let _ = writeln!(
            out,
            "  git: {} commit{}, +{} −{} in {} file{}",
            git.commits.len(),
            plural(git.commits.len() as u64),
            git.insertions,
            git.deletions,
            git.files_changed,
            plural(git.files_changed),
        );
        for commit in &git.commits {
            let _ = writeln!(out, "    {} {}", commit.short_hash, commit.message);
        }
    }

    if !project.files_touched.is_empty() {
        let preview: Vec<&str> = project
            .files_touched
            .iter()
            .take(5)
            .map(String::as_str)
            .collect();
        let suffix = if project.files_touched.len() > 5 {
            format!(" (+{} more)", project.files_touched.len() - 5)
        } else {
            String::new()
        };
        let _ = writeln!(out, "  files: {}{}", preview.join(", "), suffix);
    }

    if let Some(ref summary) = project.summary {
        let _ = writeln!(out, "  {summary}");
    }

    let _ = writeln!(out);
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

pub fn format_duration(ms: i64) -> String {
    let total_minutes = ms / 60_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{}s", ms / 1000)
    }
}

pub fn format_cost(usd: f64) -> String {
    if usd >= 0.995 {
        format!("${usd:.2}")
    } else {
        format!("${usd:.3}")
    }
}

pub fn format_tokens(n: u64) -> String {
    if n >= 10_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 10_000 {
        format!("{:.1}k", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

fn format_usage(usage: &TokenUsage) -> String {
    let mut parts = vec![
        format!("{} in", format_tokens(usage.input)),
        format!("{} out", format_tokens(usage.output)),
    ];
    if usage.reasoning > 0 {
        parts.push(format!("{} reasoning", format_tokens(usage.reasoning)));
    }
    if usage.cache_read > 0 {
        parts.push(format!("{} cache read", format_tokens(usage.cache_read)));
    }
    if usage.cache_write > 0 {
        parts.push(format!("{} cache write", format_tokens(usage.cache_write)));
    }
    parts.join(" · ")
}
