//! Configuration types and loading.
//!
//! Startup defaults are loaded from a JSON file (e.g. `~/.deck/config.json`) and environment.
//! The file is only read; settings changed from the UI live in memory for the session.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default Ollama chat endpoint.
pub const DEFAULT_API_URL: &str = "http://localhost:11434/api/chat";

/// Path suffix every API URL is normalized to end with.
pub const CHAT_PATH: &str = "/api/chat";

/// Path of the model listing endpoint on the same base URL.
pub const TAGS_PATH: &str = "/api/tags";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Ollama endpoint and timeouts.
    #[serde(default)]
    pub api: ApiConfig,

    /// Where transcripts are stored and whether all models share one.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Display defaults.
    #[serde(default)]
    pub ui: UiConfig,
}

/// Ollama endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Chat endpoint (default http://localhost:11434/api/chat). Overridden by DECK_API_URL env.
    #[serde(default = "default_api_url")]
    pub url: String,

    /// Connect and per-read idle timeout for chat streaming.
    #[serde(default = "default_chat_timeout_secs")]
    pub chat_timeout_secs: u64,

    /// Timeout for the reachability probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Timeout for listing models.
    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_chat_timeout_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_list_timeout_secs() -> u64 {
    5
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            chat_timeout_secs: default_chat_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            list_timeout_secs: default_list_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }
}

/// Transcript storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Directory holding one JSON file per history key (default ~/.deck/chat_history).
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Start in global mode (all models share one transcript).
    #[serde(default)]
    pub global: bool,
}

/// Display defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiConfig {
    /// Name shown for assistant replies.
    #[serde(default = "default_ai_name")]
    pub ai_name: String,

    /// Page opened by the Website screen.
    #[serde(default = "default_website_url")]
    pub website_url: String,
}

pub fn default_ai_name() -> String {
    "AI".to_string()
}

fn default_website_url() -> String {
    "https://ollama.com/library".to_string()
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            ai_name: default_ai_name(),
            website_url: default_website_url(),
        }
    }
}

/// Normalize a user-entered API URL so it ends with `/api/chat`.
pub fn normalize_api_url(url: &str) -> String {
    let url = url.trim();
    if url.ends_with(CHAT_PATH) {
        url.to_string()
    } else {
        format!("{}{}", url.trim_end_matches('/'), CHAT_PATH)
    }
}

/// Model listing URL for a (normalized) chat URL.
pub fn tags_url(chat_url: &str) -> String {
    let base = chat_url.strip_suffix(CHAT_PATH).unwrap_or(chat_url);
    format!("{}{}", base.trim_end_matches('/'), TAGS_PATH)
}

/// Resolve the API URL: env DECK_API_URL overrides config. Always normalized.
pub fn resolve_api_url(config: &Config) -> String {
    let url = std::env::var("DECK_API_URL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.api.url.clone());
    normalize_api_url(&url)
}

/// Resolve the history directory: config override, else ~/.deck/chat_history, else ./chat_history.
pub fn resolve_history_dir(config: &Config) -> PathBuf {
    match &config.history.directory {
        Some(d) if !d.as_os_str().is_empty() => d.clone(),
        _ => dirs::home_dir()
            .map(|h| h.join(".deck").join("chat_history"))
            .unwrap_or_else(|| PathBuf::from("chat_history")),
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("DECK_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".deck").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or DECK_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Settings the user can change at runtime. Never written back to disk.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Normalized chat URL.
    pub api_url: String,
    pub ai_name: String,
    /// Currently selected model, if any.
    pub model: Option<String>,
    /// When true all models share the `global` transcript.
    pub global_history: bool,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_url: resolve_api_url(config),
            ai_name: config.ui.ai_name.clone(),
            model: None,
            global_history: config.history.global,
        }
    }

    /// AI name for display; blank falls back to "AI".
    pub fn display_name(&self) -> String {
        let name = self.ai_name.trim();
        if name.is_empty() {
            default_ai_name()
        } else {
            name.to_string()
        }
    }

    /// Model name for display; none selected shows "Unknown".
    pub fn display_model(&self) -> &str {
        self.model.as_deref().unwrap_or("Unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_api_settings() {
        let api = ApiConfig::default();
        assert_eq!(api.url, "http://localhost:11434/api/chat");
        assert_eq!(api.chat_timeout(), Duration::from_secs(60));
        assert_eq!(api.probe_timeout(), Duration::from_secs(3));
        assert_eq!(api.list_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn normalize_appends_chat_path() {
        assert_eq!(
            normalize_api_url("http://box:11434"),
            "http://box:11434/api/chat"
        );
        assert_eq!(
            normalize_api_url("http://box:11434/ "),
            "http://box:11434/api/chat"
        );
        assert_eq!(
            normalize_api_url("http://box:11434/api/chat"),
            "http://box:11434/api/chat"
        );
    }

    #[test]
    fn tags_url_replaces_chat_suffix() {
        assert_eq!(
            tags_url("http://localhost:11434/api/chat"),
            "http://localhost:11434/api/tags"
        );
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api":{"url":"http://gpu:11434"},"ui":{"aiName":"Nova"}}"#)
                .unwrap();
        assert_eq!(config.api.url, "http://gpu:11434");
        assert_eq!(config.api.probe_timeout_secs, 3);
        assert_eq!(config.ui.ai_name, "Nova");
        assert_eq!(config.ui.website_url, "https://ollama.com/library");
        assert!(!config.history.global);
    }

    #[test]
    fn history_dir_override() {
        let mut config = Config::default();
        config.history.directory = Some(PathBuf::from("/tmp/deck-history"));
        assert_eq!(resolve_history_dir(&config), PathBuf::from("/tmp/deck-history"));
    }

    #[test]
    fn blank_ai_name_displays_default() {
        let mut settings = Settings::from_config(&Config::default());
        settings.ai_name = "   ".to_string();
        assert_eq!(settings.display_name(), "AI");
        assert_eq!(settings.display_model(), "Unknown");
    }
}
