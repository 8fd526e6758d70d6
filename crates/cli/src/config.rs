use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Get the config directory path (~/.config/standup/)
pub fn config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .context("Could not determine home directory")?;
    Ok(PathBuf::from(home).join(".config").join("standup"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("standup.toml"))
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub summary: SummaryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_summary_model")]
    pub model: String,
    /// Overridden by ANTHROPIC_API_KEY when set.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_summary_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_summary_model(),
            api_key: None,
        }
    }
}

impl Config {
    /// Load config from disk, falling back to defaults when the file is
    /// absent. A present-but-broken file is an error: silently ignoring
    /// it would mask typos.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        let mut config = if path.is_file() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config at {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config at {}", path.display()))?
        } else {
            Config::default()
        };
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.trim().is_empty() {
                config.summary.api_key = Some(key);
            }
        }
        Ok(config)
    }
}
