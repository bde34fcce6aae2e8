//! Application configuration for Newsdesk.
//!
//! The config file is looked up at `./newsdesk.toml`, then
//! `~/.newsdesk/newsdesk.toml`. CLI flags override config file values,
//! which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NewsdeskError, Result};
use crate::types::SourceKind;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "newsdesk.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".newsdesk";

/// Upper bound on `max_retries`; anything larger is almost certainly a typo.
const MAX_RETRIES_LIMIT: u32 = 10;

/// Upper bound on `max_in_flight`.
const MAX_IN_FLIGHT_LIMIT: usize = 256;

// ---------------------------------------------------------------------------
// Config structs (matching newsdesk.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run-mode and cache settings.
    #[serde(default)]
    pub settings: RunSettings,

    /// Language-model endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Sources, in the order they appear in the report.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

/// How sources are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunModeSetting {
    #[default]
    Serial,
    Concurrent,
}

/// `[settings]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(default)]
    pub run_mode: RunModeSetting,

    /// Worker pool size in concurrent mode.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    #[serde(default = "default_cache_max_age_hours")]
    pub cache_max_age_hours: u64,

    /// Ignore fresh cache entries and always fetch.
    #[serde(default)]
    pub force_refresh: bool,

    /// Fall back to an expired cache entry when the network fetch fails.
    #[serde(default)]
    pub stale_on_error: bool,

    /// Retries per stage after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Deadline for a single stage attempt.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Directory the final report is written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Language every source is translated into.
    #[serde(default = "default_target_language")]
    pub target_language: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            run_mode: RunModeSetting::default(),
            max_in_flight: default_max_in_flight(),
            cache_enabled: true,
            cache_dir: default_cache_dir(),
            cache_max_age_hours: default_cache_max_age_hours(),
            force_refresh: false,
            stale_on_error: false,
            max_retries: default_max_retries(),
            stage_timeout_secs: default_stage_timeout_secs(),
            output_dir: default_output_dir(),
            target_language: default_target_language(),
        }
    }
}

impl RunSettings {
    /// Reject settings that make a run impossible.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(NewsdeskError::config("max_in_flight must be at least 1"));
        }
        if self.max_in_flight > MAX_IN_FLIGHT_LIMIT {
            return Err(NewsdeskError::config(format!(
                "max_in_flight {} exceeds the limit of {MAX_IN_FLIGHT_LIMIT}",
                self.max_in_flight
            )));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(NewsdeskError::config(format!(
                "max_retries {} exceeds the limit of {MAX_RETRIES_LIMIT}",
                self.max_retries
            )));
        }
        if self.stage_timeout_secs == 0 {
            return Err(NewsdeskError::config("stage_timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Cache TTL as a duration.
    pub fn cache_max_age(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_max_age_hours.saturating_mul(3600))
    }
}

fn default_true() -> bool {
    true
}
fn default_max_in_flight() -> usize {
    3
}
fn default_cache_dir() -> String {
    "cache".into()
}
fn default_cache_max_age_hours() -> u64 {
    24
}
fn default_max_retries() -> u32 {
    3
}
fn default_stage_timeout_secs() -> u64 {
    120
}
fn default_output_dir() -> String {
    ".".into()
}
fn default_target_language() -> String {
    "zh".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base (without `/chat/completions`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for perceive/model/translate unless a source overrides it.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model used for the final synthesis.
    #[serde(default = "default_integration_model")]
    pub integration_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            integration_model: default_integration_model(),
        }
    }
}

fn default_base_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".into()
}
fn default_api_key_env() -> String {
    "DASHSCOPE_API_KEY".into()
}
fn default_model() -> String {
    "qwen-turbo".into()
}
fn default_integration_model() -> String {
    "qwen-max".into()
}

/// `[[sources]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: SourceKind,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_language() -> String {
    "auto".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.newsdesk/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NewsdeskError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the user config file (`~/.newsdesk/newsdesk.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve which config file to read: an explicit path, then `./newsdesk.toml`,
/// then the user config file. Returns `None` when nothing exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(NewsdeskError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(Some(local));
    }

    let user = config_file_path()?;
    Ok(user.exists().then_some(user))
}

/// Load the application config. Returns defaults if no config file exists.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    match resolve_config_path(explicit)? {
        Some(path) => load_config_from(&path),
        None => {
            tracing::debug!("config file not found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NewsdeskError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        NewsdeskError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    tracing::debug!(path = %path.display(), sources = config.sources.len(), "config loaded");
    Ok(config)
}

/// Write a default config file (with one example source) to `path`, or to the
/// user config location when `path` is `None`. Returns the written path.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| NewsdeskError::io(dir, e))?;
    }

    let config = AppConfig {
        sources: vec![SourceEntry {
            name: "Hacker News".into(),
            url: "https://news.ycombinator.com/".into(),
            kind: SourceKind::Tech,
            language: "en".into(),
            description: "Technology community front page".into(),
            model: None,
        }],
        ..AppConfig::default()
    };
    let content =
        toml::to_string_pretty(&config).map_err(|e| NewsdeskError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NewsdeskError::io(&path, e))?;
    tracing::info!(path = %path.display(), "created default config file");

    Ok(path)
}

/// Read the LLM API key from the env var named in the config.
pub fn api_key(config: &LlmConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(NewsdeskError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("cache_max_age_hours"));
        assert!(toml_str.contains("DASHSCOPE_API_KEY"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = RunSettings::default();
        assert_eq!(settings.run_mode, RunModeSetting::Serial);
        assert_eq!(settings.max_in_flight, 3);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.cache_max_age(), std::time::Duration::from_secs(24 * 3600));
        assert!(settings.cache_enabled);
        assert!(!settings.force_refresh);
    }

    #[test]
    fn config_with_sources_preserves_order() {
        let toml_str = r#"
[settings]
run_mode = "concurrent"
max_in_flight = 2

[[sources]]
name = "Reuters"
url = "https://www.reuters.com/business/"
type = "financial"
language = "en"

[[sources]]
name = "V2EX"
url = "https://www.v2ex.com/"
type = "forum"
language = "zh"

[[sources]]
name = "Somewhere"
url = "https://example.com/"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.settings.run_mode, RunModeSetting::Concurrent);
        assert_eq!(config.settings.max_in_flight, 2);
        let names: Vec<_> = config.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Reuters", "V2EX", "Somewhere"]);
        assert_eq!(config.sources[0].kind, SourceKind::Financial);
        assert_eq!(config.sources[2].kind, SourceKind::General);
        assert_eq!(config.sources[2].language, "auto");
    }

    #[test]
    fn settings_validation() {
        let mut settings = RunSettings::default();
        assert!(settings.validate().is_ok());

        settings.max_in_flight = 0;
        assert!(settings.validate().is_err());

        settings.max_in_flight = 1;
        settings.max_retries = 50;
        assert!(settings.validate().unwrap_err().to_string().contains("max_retries"));

        settings.max_retries = 3;
        settings.max_in_flight = usize::MAX;
        assert!(settings.validate().unwrap_err().to_string().contains("max_in_flight"));
    }

    #[test]
    fn huge_cache_age_saturates() {
        let settings = RunSettings {
            cache_max_age_hours: u64::MAX,
            ..RunSettings::default()
        };
        assert_eq!(settings.cache_max_age().as_secs(), u64::MAX);
        assert_eq!(RunSettings::default().cache_max_age().as_secs(), 24 * 3600);
    }

    #[test]
    fn init_config_roundtrip() {
        let dir = std::env::temp_dir().join(format!("nd-config-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("newsdesk.toml");
        let written = init_config(Some(&path)).expect("init");
        let parsed = load_config_from(&written).expect("load");
        assert_eq!(parsed.sources.len(), 1);
        assert_eq!(parsed.sources[0].kind, SourceKind::Tech);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let missing = std::env::temp_dir().join("nd-definitely-missing.toml");
        assert!(resolve_config_path(Some(&missing)).is_err());
    }

    #[test]
    fn api_key_missing() {
        let config = LlmConfig {
            // Use a unique env var name to avoid interfering with other tests
            api_key_env: "ND_TEST_NONEXISTENT_KEY_12345".into(),
            ..LlmConfig::default()
        };
        let result = api_key(&config);
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
