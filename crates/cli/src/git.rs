//! Git activity for project directories, read by shelling out to the
//! user's own `git`. A directory that is not a repository, or a failed
//! git invocation, contributes nothing and is never an error.

use chrono::{Local, TimeZone};
use standup_core::{DayWindow, GitActivity, GitCommit};
use std::path::Path;
use std::process::Command;

// Unit separator between commit fields, record separator between
// commits. Commit subjects can contain anything printable, so the
// format string sticks to control characters.
const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "%x1e%H%x1f%h%x1f%an%x1f%at%x1f%s";

/// Commits touching `path`'s repository inside the day window,
/// optionally filtered to one author (name or email substring, per
/// `git log --author`). `None` when the directory has no repository or
/// no matching commits.
pub fn activity_for_project(
    path: &Path,
    window: &DayWindow,
    author: Option<&str>,
) -> Option<GitActivity> {
    let since = local_iso(window.start_ms);
    let until = local_iso(window.end_ms);
    let mut args = vec![
        "log".to_string(),
        format!("--since={since}"),
        format!("--until={until}"),
        format!("--format={LOG_FORMAT}"),
        "--numstat".to_string(),
        "--no-merges".to_string(),
    ];
    if let Some(author) = author {
        args.push(format!("--author={author}"));
    }
    let stdout = git_cmd(path, &args)?;

    let commits = parse_log(&stdout);
    if commits.is_empty() {
        return None;
    }

    let project_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut activity = GitActivity {
        project_path: path.to_path_buf(),
        project_name,
        insertions: commits.iter().map(|c| c.insertions).sum(),
        deletions: commits.iter().map(|c| c.deletions).sum(),
        files_changed: commits.iter().map(|c| c.files_changed).sum(),
        commits,
    };
    activity.commits.sort_by_key(|c| c.timestamp_ms);
    Some(activity)
}

fn local_iso(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%z").to_string())
        .unwrap_or_else(|| (ms / 1000).to_string())
}

fn git_cmd(cwd: &Path, args: &[String]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(cwd)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::debug!(
            "git log failed in {}: {}",
            cwd.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `--format=<fields>` + `--numstat` output. Each record starts
/// with the header line, followed by one numstat line per file
/// ("insertions<TAB>deletions<TAB>path", `-` for binary files).
fn parse_log(stdout: &str) -> Vec<GitCommit> {
    let mut commits = Vec::new();
    for record in stdout.split(RECORD_SEP) {
        let record = record.trim();
        if record.is_empty() {
            continue;
        }
        let mut lines = record.lines();
        let Some(header) = lines.next() else {
            continue;
        };
        let fields: Vec<&str> = header.split(FIELD_SEP).collect();
        if fields.len() < 5 {
            continue;
        }
        let timestamp_ms = match fields[3].trim().parse::<i64>() {
            Ok(secs) => secs * 1000,
            Err(_) => continue,
        };

        let mut insertions = 0u64;
        let mut deletions = 0u64;
        let mut files = Vec::new();
        for line in lines {
            let mut cols = line.split('\t');
            let (Some(ins), Some(del), Some(file)) = (cols.next(), cols.next(), cols.next())
            else {
                continue;
            };
            insertions += ins.trim().parse::<u64>().unwrap_or(0);
            deletions += del.trim().parse::<u64>().unwrap_or(0);
            files.push(file.trim().to_string());
        }

        commits.push(GitCommit {
            hash: fields[0].to_string(),
            short_hash: fields[1].to_string(),
            author: fields[2].to_string(),
            message: fields[4].to_string(),
            timestamp_ms,
            files_changed: files.len() as u64,
            insertions,
            deletions,
            files,
        });
    }
    commits
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_log_two_commits() {
        let stdout = format!(
            "{r}abc123{f}abc{f}Dev One{f}1767000000{f}Fix the flaky retry test\n\
             3\t1\tsrc/retry.rs\n\
             10\t0\ttests/retry.rs\n\
             {r}def456{f}def{f}Dev One{f}1767003600{f}Add backoff jitter\n\
             5\t2\tsrc/retry.rs\n\
             -\t-\tassets/logo.png\n",
            r = RECORD_SEP,
            f = FIELD_SEP
        );
        let commits = parse_log(&stdout);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].short_hash, "abc");
        assert_eq!(commits[0].message, "Fix the flaky retry test");
        assert_eq!(commits[0].timestamp_ms, 1_767_000_000_000);
        assert_eq!(commits[0].insertions, 13);
        assert_eq!(commits[0].deletions, 1);
        assert_eq!(commits[0].files_changed, 2);
        // Binary numstat columns count as zero lines but still one file.
        assert_eq!(commits[1].insertions, 5);
        assert_eq!(commits[1].files_changed, 2);
    }

    #[test]
    fn test_parse_log_ignores_garbage_records() {
        let stdout = format!("{r}\n{r}not-enough-fields\n", r = RECORD_SEP);
        assert!(parse_log(&stdout).is_empty());
    }

    #[test]
    fn test_non_repo_directory_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let window = DayWindow::for_date(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        assert!(activity_for_project(tmp.path(), &window, None).is_none());
    }
}
