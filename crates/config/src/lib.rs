//! Configuration loading, validation, and management for toolflow.
//!
//! Loads configuration from `~/.toolflow/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Filter kinds understood by the filter manager.
pub const FILTER_KINDS: [&str; 4] = ["threshold", "tag", "priority", "composite"];

/// The root configuration structure.
///
/// Maps directly to `~/.toolflow/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model endpoint settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Orchestration loop settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// HTTP / SSE / WebSocket gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Custom tool filter strategies registered at startup
    #[serde(default)]
    pub filters: Vec<FilterStrategyConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Ceiling on DECIDE turns per run; exceeding it fails the run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    /// Strategy used when a request names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_strategy: Option<String>,

    /// Tag pre-filter used when a request names none
    #[serde(default)]
    pub tool_tags: Vec<String>,

    /// Ask the model for token deltas and emit partial `token` events
    #[serde(default)]
    pub stream_tokens: bool,
}

fn default_max_steps() -> usize {
    25
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            system_message: None,
            filter_strategy: None,
            tool_tags: Vec::new(),
            stream_tokens: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Route prefix for the agent API
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Protocol filter consulted before serving a transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_strategy: Option<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_api_prefix() -> String {
    "/api/agent/v1".into()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            api_prefix: default_api_prefix(),
            cors_origins: default_cors_origins(),
            protocol_strategy: None,
        }
    }
}

/// A named tool filter strategy.
///
/// ```toml
/// [[filters]]
/// name = "external_top3"
/// kind = "composite"
/// strategies = ["external_only", "priority"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStrategyConfig {
    pub name: String,

    /// One of [`FILTER_KINDS`]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tools: Option<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_tags: Vec<String>,

    /// Member strategy names, for `composite`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strategies: Vec<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.toolflow/config.toml).
    ///
    /// Environment overrides:
    /// - `TOOLFLOW_API_KEY`, then `OPENAI_API_KEY` (only if no key is configured)
    /// - `TOOLFLOW_MODEL`
    /// - `TOOLFLOW_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.model.api_key.is_none() {
            self.model.api_key = lookup("TOOLFLOW_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("TOOLFLOW_MODEL") {
            self.model.model = model;
        }
        if let Some(url) = lookup("TOOLFLOW_API_URL") {
            self.model.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolflow")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.orchestrator.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_steps must be > 0".into(),
            ));
        }

        let prefix = &self.gateway.api_prefix;
        if !prefix.starts_with('/') || (prefix.len() > 1 && prefix.ends_with('/')) {
            return Err(ConfigError::ValidationError(format!(
                "gateway.api_prefix must start with '/' and have no trailing '/': {prefix}"
            )));
        }

        let mut seen = HashSet::new();
        for filter in &self.filters {
            if filter.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "filters: strategy name must not be empty".into(),
                ));
            }
            if !seen.insert(filter.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "filters: duplicate strategy name '{}'",
                    filter.name
                )));
            }
            if !FILTER_KINDS.contains(&filter.kind.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "filters: unknown kind '{}' for '{}' (expected one of {})",
                    filter.kind,
                    filter.name,
                    FILTER_KINDS.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
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
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.max_steps, 25);
        assert_eq!(config.gateway.api_prefix, "/api/agent/v1");
        assert_eq!(config.gateway.cors_origins, vec!["http://localhost:5173"]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.model, config.model.model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.model.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_steps_rejected() {
        let mut config = AppConfig::default();
        config.orchestrator.max_steps = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_steps"));
    }

    #[test]
    fn bad_prefix_rejected() {
        let mut config = AppConfig::default();
        config.gateway.api_prefix = "api/v1/".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.model.model, "gpt-4o-mini");
    }

    #[test]
    fn load_from_file_with_filters() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[model]
model = "local-model"
api_url = "http://localhost:11434/v1"

[orchestrator]
max_steps = 8
filter_strategy = "external_top3"
tool_tags = ["external"]

[gateway]
port = 9000
protocol_strategy = "http_only"

[[filters]]
name = "external_only"
kind = "tag"
include_tags = ["external"]

[[filters]]
name = "external_top3"
kind = "composite"
strategies = ["external_only", "threshold_5"]
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.model.model, "local-model");
        assert_eq!(config.orchestrator.max_steps, 8);
        assert_eq!(config.orchestrator.tool_tags, vec!["external"]);
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.protocol_strategy.as_deref(), Some("http_only"));
        assert_eq!(config.filters.len(), 2);
        assert_eq!(config.filters[1].strategies, vec!["external_only", "threshold_5"]);
        // Unset sections keep their defaults
        assert_eq!(config.gateway.api_prefix, "/api/agent/v1");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[model\nmodel = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn unknown_filter_kind_rejected() {
        let config = AppConfig {
            filters: vec![FilterStrategyConfig {
                name: "odd".into(),
                kind: "random".into(),
                max_tools: None,
                include_tags: vec![],
                exclude_tags: vec![],
                strategies: vec![],
            }],
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("random"));
    }

    #[test]
    fn duplicate_filter_names_rejected() {
        let filter = FilterStrategyConfig {
            name: "top".into(),
            kind: "threshold".into(),
            max_tools: Some(3),
            include_tags: vec![],
            exclude_tags: vec![],
            strategies: vec![],
        };
        let config = AppConfig {
            filters: vec![filter.clone(), filter],
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-openai"),
            ("TOOLFLOW_MODEL", "gpt-4o"),
            ("TOOLFLOW_API_URL", "http://proxy/v1"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.model.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.model.model, "gpt-4o");
        assert_eq!(config.model.api_url, "http://proxy/v1");
    }

    #[test]
    fn configured_key_wins_over_env() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-file".into());
        config.apply_env(|k| (k == "TOOLFLOW_API_KEY").then(|| "sk-env".to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("/api/agent/v1"));
    }
}
