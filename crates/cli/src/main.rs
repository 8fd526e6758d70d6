mod config;
mod git;
mod render;
mod summarize;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::Parser;
use standup_core::{build_recap, DayWindow, GitActivity};
use standup_sources::all_sources;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "standup",
    about = "Reconstruct one day of AI-assisted coding activity from local tool storage"
)]
struct Cli {
    /// Day to recap: today, yesterday, or YYYY-MM-DD
    #[arg(default_value = "today")]
    date: String,

    /// Emit the recap as JSON instead of the terminal report
    #[arg(long)]
    json: bool,

    /// Skip LLM summaries even when an API key is configured
    #[arg(long)]
    no_summary: bool,

    /// Count only git commits by this author (name or email substring)
    #[arg(long)]
    author: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let date = parse_date(&cli.date)?;
    let window = DayWindow::for_date(date);

    let mut sessions = Vec::new();
    for source in all_sources() {
        if !source.is_available() {
            tracing::debug!("{} storage not found, skipping", source.tool().as_str());
            continue;
        }
        match source.sessions_for_day(&window) {
            Ok(mut found) => {
                tracing::debug!("{}: {} sessions", source.tool().as_str(), found.len());
                sessions.append(&mut found);
            }
            Err(e) => {
                tracing::warn!("Failed to read {} storage: {:#}", source.tool().as_str(), e);
            }
        }
    }

    let mut git: HashMap<PathBuf, GitActivity> = HashMap::new();
    let mut project_paths: Vec<PathBuf> = sessions
        .iter()
        .filter_map(|s| s.project_path.clone())
        .collect();
    project_paths.sort();
    project_paths.dedup();
    for path in project_paths {
        if let Some(activity) = git::activity_for_project(&path, &window, cli.author.as_deref()) {
            git.insert(path, activity);
        }
    }

    let mut recap = build_recap(date, &sessions, git);

    if !cli.no_summary {
        let config = config::Config::load()?;
        attach_summaries(&mut recap, &config);
    }

    let output = if cli.json {
        render::render_json(&recap)?
    } else {
        render::render_human(&recap)
    };
    print!("{output}");
    Ok(())
}

/// Fill the recap's summary slots when summaries are enabled and a key
/// is available. Every failure is logged and skipped; a non-retriable
/// failure (bad key, bad model name) stops further calls since they
/// would all fail the same way.
fn attach_summaries(recap: &mut standup_core::DayRecap, config: &config::Config) {
    if !config.summary.enabled {
        return;
    }
    let Some(api_key) = config.summary.api_key.clone() else {
        tracing::debug!("No API key configured, skipping summaries");
        return;
    };
    let summarizer = summarize::Summarizer::new(api_key, config.summary.model.clone());

    for project in &mut recap.projects {
        if project.sessions.is_empty() {
            continue;
        }
        match summarizer.summarize_project(project) {
            Ok(text) => project.summary = Some(text),
            Err(e) => {
                tracing::warn!("Skipping summary for {}: {}", project.name, e);
                if !e.retriable {
                    return;
                }
            }
        }
    }
    match summarizer.summarize_day(recap) {
        Ok(text) => recap.standup = Some(text),
        Err(e) => tracing::warn!("Skipping standup summary: {}", e),
    }
}

fn parse_date(arg: &str) -> Result<NaiveDate> {
    let today = Local::now().date_naive();
    match arg {
        "today" => Ok(today),
        "yesterday" => Ok(today - Duration::days(1)),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{other}': use today, yesterday, or YYYY-MM-DD")),
    }
}
