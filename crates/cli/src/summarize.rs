//! LLM summaries for the day recap via the Anthropic Messages API.
//!
//! Summaries are strictly optional: every failure maps to a typed error
//! the caller logs and moves past, so a missing key, a rate limit, or a
//! dead network never blocks the report.

use serde_json::{json, Value};
use standup_core::extract::clip;
use standup_core::{DayRecap, ProjectSummary};
use thiserror::Error;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u64 = 512;
const TIMEOUT_SECS: u64 = 30;
const PROJECT_CONTEXT_CHAR_LIMIT: usize = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryErrorKind {
    Auth,
    RateLimit,
    Quota,
    InvalidRequest,
    Server,
    Timeout,
    Network,
    MalformedResponse,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct SummaryError {
    pub kind: SummaryErrorKind,
    pub message: String,
    /// Whether trying again later could plausibly succeed. The CLI does
    /// not retry within a run; this informs the user-facing hint only.
    pub retriable: bool,
}

impl SummaryError {
    fn new(kind: SummaryErrorKind, message: impl Into<String>) -> Self {
        let retriable = matches!(
            kind,
            SummaryErrorKind::RateLimit
                | SummaryErrorKind::Server
                | SummaryErrorKind::Timeout
                | SummaryErrorKind::Network
        );
        Self {
            kind,
            message: message.into(),
            retriable,
        }
    }
}

pub struct Summarizer {
    api_key: String,
    model: String,
}

impl Summarizer {
    pub fn new(api_key: String, model: String) -> Self {
        Self { api_key, model }
    }

    /// One- or two-sentence description of what happened in a project.
    pub fn summarize_project(&self, project: &ProjectSummary) -> Result<String, SummaryError> {
        let context = project_context(project);
        let prompt = format!(
            "Below are excerpts from today's AI coding sessions in the project \
             \"{}\". Write one or two plain sentences describing what was worked \
             on. No preamble, no bullet points.\n\n{}",
            project.name, context
        );
        self.complete(&prompt)
    }

    /// Short standup-style paragraph covering the whole day.
    pub fn summarize_day(&self, recap: &DayRecap) -> Result<String, SummaryError> {
        let mut context = String::new();
        for project in &recap.projects {
            context.push_str(&format!(
                "## {} ({} sessions, {} commits)\n",
                project.name,
                project.totals.sessions,
                project.totals.commits
            ));
            match project.summary.as_deref() {
                Some(summary) => context.push_str(summary),
                None => context.push_str(&clip(&project_context(project), 1500)),
            }
            context.push('\n');
        }
        let prompt = format!(
            "Below is a per-project digest of one developer's day ({}). Write a \
             short standup-style paragraph, first person, past tense, covering \
             the main threads of work. No bullet points.\n\n{}",
            recap.date, context
        );
        self.complete(&prompt)
    }

    fn complete(&self, prompt: &str) -> Result<String, SummaryError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(TIMEOUT_SECS))
            .build();
        let response = agent
            .post(API_URL)
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", API_VERSION)
            .set("content-type", "application/json")
            .send_json(json!({
                "model": self.model,
                "max_tokens": MAX_OUTPUT_TOKENS,
                "messages": [{"role": "user", "content": prompt}],
            }));

        let response = match response {
            Ok(r) => r,
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(status_error(code, &body));
            }
            Err(ureq::Error::Transport(t)) => {
                let message = t.to_string();
                let kind = if message.contains("timed out") || message.contains("timeout") {
                    SummaryErrorKind::Timeout
                } else {
                    SummaryErrorKind::Network
                };
                return Err(SummaryError::new(kind, message));
            }
        };

        let body: Value = response.into_json().map_err(|e| {
            SummaryError::new(
                SummaryErrorKind::MalformedResponse,
                format!("Response was not JSON: {e}"),
            )
        })?;
        extract_text(&body).ok_or_else(|| {
            SummaryError::new(
                SummaryErrorKind::MalformedResponse,
                "Response carried no text content",
            )
        })
    }
}

fn project_context(project: &ProjectSummary) -> String {
    let mut context = String::new();
    for session in &project.sessions {
        if let Some(ref title) = session.title {
            context.push_str(&format!("### {title}\n"));
        }
        context.push_str(&session.digest);
        context.push('\n');
    }
    if let Some(ref git) = project.git {
        context.push_str("Commits:\n");
        for commit in &git.commits {
            context.push_str(&format!("- {}\n", commit.message));
        }
    }
    clip(&context, PROJECT_CONTEXT_CHAR_LIMIT)
}

fn status_error(code: u16, body: &str) -> SummaryError {
    let detail = error_detail(body).unwrap_or_else(|| format!("HTTP {code}"));
    match code {
        401 | 403 => SummaryError::new(SummaryErrorKind::Auth, detail),
        429 => {
            // The API reports both throttling and exhausted credit as 429.
            if body.contains("credit") || body.contains("quota") || body.contains("billing") {
                SummaryError::new(SummaryErrorKind::Quota, detail)
            } else {
                SummaryError::new(SummaryErrorKind::RateLimit, detail)
            }
        }
        400 | 404 | 422 => SummaryError::new(SummaryErrorKind::InvalidRequest, detail),
        code if code >= 500 => SummaryError::new(SummaryErrorKind::Server, detail),
        _ => SummaryError::new(SummaryErrorKind::InvalidRequest, detail),
    }
}

fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn extract_text(body: &Value) -> Option<String> {
    let blocks = body.get("content")?.as_array()?;
    let text: Vec<&str> = blocks
        .iter()
        .filter_map(|b| {
            if b.get("type").and_then(Value::as_str) == Some("text") {
                b.get("text").and_then(Value::as_str)
            } else {
                None
            }
        })
        .collect();
    let joined = text.join("\n").trim().to_string();
    (!joined.is_empty()).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_mapping() {
        assert_eq!(status_error(401, "").kind, SummaryErrorKind::Auth);
        assert_eq!(status_error(403, "").kind, SummaryErrorKind::Auth);
        assert_eq!(status_error(400, "").kind, SummaryErrorKind::InvalidRequest);
        assert_eq!(status_error(500, "").kind, SummaryErrorKind::Server);
        assert_eq!(status_error(529, "").kind, SummaryErrorKind::Server);
    }

    #[test]
    fn test_429_quota_vs_rate_limit() {
        let quota = status_error(
            429,
            r#"{"error":{"message":"Your credit balance is too low"}}"#,
        );
        assert_eq!(quota.kind, SummaryErrorKind::Quota);
        let throttle = status_error(429, r#"{"error":{"message":"Too many requests"}}"#);
        assert_eq!(throttle.kind, SummaryErrorKind::RateLimit);
        assert!(throttle.retriable);
    }

    #[test]
    fn test_auth_errors_not_retriable() {
        assert!(!status_error(401, "").retriable);
        assert!(!status_error(400, "").retriable);
        assert!(status_error(503, "").retriable);
    }

    #[test]
    fn test_extract_text_joins_blocks() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "Worked on the parser."},
                {"type": "tool_use", "name": "ignored"},
                {"type": "text", "text": "Fixed two bugs."}
            ]
        });
        assert_eq!(
            extract_text(&body).as_deref(),
            Some("Worked on the parser.\nFixed two bugs.")
        );
    }

    #[test]
    fn test_extract_text_empty_content() {
        assert!(extract_text(&serde_json::json!({"content": []})).is_none());
        assert!(extract_text(&serde_json::json!({})).is_none());
    }

    #[test]
    fn test_error_detail_from_api_body() {
        let detail = error_detail(r#"{"error":{"type":"x","message":"invalid x-api-key"}}"#);
        assert_eq!(detail.as_deref(), Some("invalid x-api-key"));
        assert!(error_detail("plain text").is_none());
    }
}
