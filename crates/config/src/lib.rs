//! Configuration loading, validation, and management for taskforge.
//!
//! Loads configuration from `~/.taskforge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.taskforge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Agent loop configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool path policy
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("streams_tool_calls", &self.streams_tool_calls)
            .finish()
    }
}

/// Agent loop knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard upper bound of agent-loop steps per run, shared with
    /// verification continuations.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Maximum execution attempts per tool call.
    #[serde(default = "default_max_tool_retries")]
    pub max_tool_retries: u32,

    /// Fixed delay between tool retry attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Hard cap on verification passes per run.
    #[serde(default = "default_max_verification_passes")]
    pub max_verification_passes: u32,

    /// Whether to run the planning pass before the loop.
    #[serde(default = "default_true")]
    pub planning_enabled: bool,

    /// How many recent conversation messages the planner sees.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Confidence (0-100) at which verification stops.
    #[serde(default = "default_confidence_threshold")]
    pub verification_confidence_threshold: u8,
}

fn default_max_steps() -> u32 {
    25
}
fn default_max_tool_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_max_verification_passes() -> u32 {
    3
}
fn default_history_window() -> usize {
    6
}
fn default_confidence_threshold() -> u8 {
    95
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tool_retries: default_max_tool_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_verification_passes: default_max_verification_passes(),
            planning_enabled: true,
            history_window: default_history_window(),
            verification_confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// Filesystem policy for the built-in file tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Allowed root directories. Empty = allow all.
    #[serde(default)]
    pub allowed_roots: Vec<String>,

    /// Forbidden path prefixes.
    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,
}

fn default_forbidden_paths() -> Vec<String> {
    vec![
        "/etc".into(),
        "/proc".into(),
        "/sys".into(),
        "~/.ssh".into(),
        "~/.gnupg".into(),
        "~/.aws".into(),
    ]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_roots: vec![],
            forbidden_paths: default_forbidden_paths(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Whether this provider streams tool-call arguments reliably.
    /// When false the agent issues blocking calls for tool-bearing turns.
    #[serde(default = "default_true")]
    pub streams_tool_calls: bool,
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskforge/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `TASKFORGE_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("TASKFORGE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("TASKFORGE_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("TASKFORGE_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskforge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.max_tool_retries == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_retries must be at least 1".into(),
            ));
        }

        if self.agent.verification_confidence_threshold > 100 {
            return Err(ConfigError::ValidationError(
                "agent.verification_confidence_threshold must be 0-100".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "openrouter");
        assert_eq!(config.agent.max_steps, 25);
        assert_eq!(config.agent.max_tool_retries, 3);
        assert!(config.agent.planning_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.agent.max_steps, config.agent.max_steps);
        assert_eq!(
            parsed.agent.verification_confidence_threshold,
            config.agent.verification_confidence_threshold
        );
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_steps_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_provider, "openrouter");
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("max_steps"));
    }

    #[test]
    fn provider_streaming_flag_parses() {
        let toml_str = r#"
[providers.lmstudio]
api_url = "http://localhost:1234/v1"
streams_tool_calls = false
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let p = config.providers.get("lmstudio").unwrap();
        assert!(!p.streams_tool_calls);
        assert_eq!(p.api_url.as_deref(), Some("http://localhost:1234/v1"));
    }

    #[test]
    fn agent_section_overrides() {
        let toml_str = r#"
[agent]
max_steps = 10
retry_delay_ms = 250
planning_enabled = false
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent.max_steps, 10);
        assert_eq!(config.agent.retry_delay_ms, 250);
        assert!(!config.agent.planning_enabled);
        // Untouched fields keep defaults
        assert_eq!(config.agent.max_verification_passes, 3);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
