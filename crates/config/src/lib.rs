//! Configuration loading, validation, and management for Ratchet.
//!
//! Loads configuration from `~/.ratchet/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.ratchet/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Sub-agent fan-out limits
    #[serde(default)]
    pub subagents: SubAgentConfig,

    /// Approval / human-request gates
    #[serde(default)]
    pub gates: GatesConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Gateway (SSE + review API) configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Secret backend configuration
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Provider aliases
    #[serde(default)]
    pub providers: ProvidersConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; `~` expands to the home directory
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "~/.ratchet/ratchet.db".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// The database path with a leading `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on model calls per task; 0 means "use the default"
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// How long the loop waits on an approval before giving up
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,

    /// How long the loop waits on a blocking human request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub loop_detection: LoopDetectionConfig,

    #[serde(default)]
    pub context: ContextConfig,

    /// Memories injected into the system prompt per task
    #[serde(default = "default_memory_recall_limit")]
    pub memory_recall_limit: usize,

    /// Distill the assistant's output into memory when a task ends
    #[serde(default = "default_true")]
    pub auto_save_memory: bool,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_approval_timeout_secs() -> u64 {
    30 * 60
}
fn default_request_timeout_secs() -> u64 {
    60 * 60
}
fn default_memory_recall_limit() -> usize {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            approval_timeout_secs: default_approval_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            loop_detection: LoopDetectionConfig::default(),
            context: ContextConfig::default(),
            memory_recall_limit: default_memory_recall_limit(),
            auto_save_memory: true,
        }
    }
}

impl AgentConfig {
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Loop detector thresholds. Zero values fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopDetectionConfig {
    #[serde(default = "default_max_consecutive")]
    pub max_consecutive: usize,
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
    /// Complete A/B pairs before the pattern counts as a loop
    #[serde(default = "default_max_alternating")]
    pub max_alternating: usize,
    #[serde(default = "default_max_no_progress")]
    pub max_no_progress: usize,
}

fn default_max_consecutive() -> usize {
    3
}
fn default_max_errors() -> usize {
    2
}
fn default_max_alternating() -> usize {
    3
}
fn default_max_no_progress() -> usize {
    3
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            max_consecutive: default_max_consecutive(),
            max_errors: default_max_errors(),
            max_alternating: default_max_alternating(),
            max_no_progress: default_max_no_progress(),
        }
    }
}

impl LoopDetectionConfig {
    /// Replace zero thresholds with their defaults.
    pub fn normalized(self) -> Self {
        let d = Self::default();
        let pick = |v: usize, fallback: usize| if v == 0 { fallback } else { v };
        Self {
            max_consecutive: pick(self.max_consecutive, d.max_consecutive),
            max_errors: pick(self.max_errors, d.max_errors),
            max_alternating: pick(self.max_alternating, d.max_alternating),
            max_no_progress: pick(self.max_no_progress, d.max_no_progress),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Fraction of the model's context window that triggers compaction
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,

    /// Per-model context limits that override the built-in table
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub model_limits: HashMap<String, usize>,
}

fn default_compaction_threshold() -> f64 {
    0.80
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: default_compaction_threshold(),
            model_limits: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentConfig {
    #[serde(default = "default_max_per_parent")]
    pub max_per_parent: usize,

    /// Spawn depth; 1 means sub-agents cannot spawn
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

fn default_max_per_parent() -> usize {
    5
}
fn default_max_depth() -> usize {
    1
}
fn default_wait_timeout_secs() -> u64 {
    600
}

impl Default for SubAgentConfig {
    fn default() -> Self {
        Self {
            max_per_parent: default_max_per_parent(),
            max_depth: default_max_depth(),
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesConfig {
    /// Store polling interval of every wait
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Stored timeout of a new approval
    #[serde(default = "default_approval_timeout_minutes")]
    pub approval_timeout_minutes: i64,

    /// Stored timeout of a new human request
    #[serde(default = "default_request_timeout_minutes")]
    pub request_timeout_minutes: i64,

    /// How often stale gates are swept to timeout / expired
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_approval_timeout_minutes() -> i64 {
    30
}
fn default_request_timeout_minutes() -> i64 {
    60
}
fn default_reaper_interval_secs() -> u64 {
    60
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            approval_timeout_minutes: default_approval_timeout_minutes(),
            request_timeout_minutes: default_request_timeout_minutes(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl GatesConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,

    #[serde(default = "default_max_exec_timeout_secs")]
    pub max_exec_timeout_secs: u64,
}

fn default_exec_timeout_secs() -> u64 {
    30
}
fn default_max_exec_timeout_secs() -> u64 {
    300
}

/// Hard ceiling on any per-exec timeout.
pub const EXEC_TIMEOUT_CEILING_SECS: u64 = 300;

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            exec_timeout_secs: default_exec_timeout_secs(),
            max_exec_timeout_secs: default_max_exec_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Per-client SSE queue capacity
    #[serde(default = "default_sse_buffer")]
    pub sse_buffer: usize,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_sse_buffer() -> usize {
    64
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            sse_buffer: default_sse_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// "env" or "memory"
    #[serde(default = "default_secrets_backend")]
    pub backend: String,

    /// Only variables with this prefix are visible to the env backend
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,

    /// Names loaded into the guard at startup; empty loads everything
    #[serde(default)]
    pub preload: Vec<String>,
}

fn default_secrets_backend() -> String {
    "env".into()
}
fn default_env_prefix() -> String {
    "RATCHET_SECRET_".into()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: default_secrets_backend(),
            env_prefix: default_env_prefix(),
            preload: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Alias used when an agent names none
    #[serde(default = "default_provider")]
    pub default: String,

    /// Alias → backend settings
    #[serde(default)]
    pub aliases: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "mock".into()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            aliases: HashMap::new(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Backend kind (e.g. "mock")
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ratchet/config.toml).
    ///
    /// Environment variables override file values:
    /// - `RATCHET_DB_PATH`
    /// - `RATCHET_MAX_ITERATIONS`
    /// - `RATCHET_GATEWAY_PORT`
    /// - `RATCHET_SECRETS_BACKEND`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
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

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Apply `RATCHET_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("RATCHET_DB_PATH") {
            self.database.path = path;
        }
        if let Some(raw) = lookup("RATCHET_MAX_ITERATIONS") {
            self.agent.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "RATCHET_MAX_ITERATIONS must be a non-negative integer, got '{raw}'"
                ))
            })?;
        }
        if let Some(raw) = lookup("RATCHET_GATEWAY_PORT") {
            self.gateway.port = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "RATCHET_GATEWAY_PORT must be a port number, got '{raw}'"
                ))
            })?;
        }
        if let Some(backend) = lookup("RATCHET_SECRETS_BACKEND") {
            self.secrets.backend = backend;
        }
        self.normalize();
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ratchet")
    }

    /// Fill zero-valued limits with their defaults.
    fn normalize(&mut self) {
        if self.agent.max_iterations == 0 {
            self.agent.max_iterations = default_max_iterations();
        }
        self.agent.loop_detection = self.agent.loop_detection.normalized();
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.agent.context.compaction_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "agent.context.compaction_threshold must be in (0, 1]".into(),
            ));
        }

        if self.gateway.sse_buffer < 64 {
            return Err(ConfigError::ValidationError(
                "gateway.sse_buffer must be at least 64".into(),
            ));
        }

        if self.tools.max_exec_timeout_secs > EXEC_TIMEOUT_CEILING_SECS {
            return Err(ConfigError::ValidationError(format!(
                "tools.max_exec_timeout_secs cannot exceed {EXEC_TIMEOUT_CEILING_SECS}"
            )));
        }

        if self.tools.exec_timeout_secs == 0
            || self.tools.exec_timeout_secs > self.tools.max_exec_timeout_secs
        {
            return Err(ConfigError::ValidationError(
                "tools.exec_timeout_secs must be in 1..=max_exec_timeout_secs".into(),
            ));
        }

        if self.subagents.max_per_parent == 0 {
            return Err(ConfigError::ValidationError(
                "subagents.max_per_parent must be at least 1".into(),
            ));
        }

        if self.gates.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "gates.poll_interval_ms must be positive".into(),
            ));
        }

        if self.gates.approval_timeout_minutes <= 0 || self.gates.request_timeout_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "gate timeouts must be positive".into(),
            ));
        }

        match self.secrets.backend.as_str() {
            "env" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown secrets backend '{other}' (expected 'env' or 'memory')"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `ratchet init-config`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs_home().join(rest),
        None if path == "~" => dirs_home(),
        None => PathBuf::from(path),
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
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.subagents.max_per_parent, 5);
        assert_eq!(config.gateway.port, 42618);
        assert_eq!(config.providers.default, "mock");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agent.max_iterations, config.agent.max_iterations);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.secrets.backend, "env");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_iterations = 0

[agent.loop_detection]
max_errors = 4
max_consecutive = 0

[providers.aliases.fast]
kind = "mock"
model = "mock-fast"
api_key = "sk-live-123"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.loop_detection.max_errors, 4);
        assert_eq!(config.agent.loop_detection.max_consecutive, 3);
        assert_eq!(config.agent.approval_timeout_secs, 1800);
        assert_eq!(config.providers.aliases["fast"].kind, "mock");
    }

    #[test]
    fn debug_output_redacts_provider_keys() {
        let mut config = AppConfig::default();
        config.providers.aliases.insert(
            "live".into(),
            ProviderConfig {
                kind: "mock".into(),
                model: None,
                api_url: None,
                api_key: Some("sk-live-123".into()),
            },
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-live-123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|key| match key {
                "RATCHET_DB_PATH" => Some("/var/lib/ratchet.db".into()),
                "RATCHET_MAX_ITERATIONS" => Some("25".into()),
                "RATCHET_GATEWAY_PORT" => Some("9000".into()),
                "RATCHET_SECRETS_BACKEND" => Some("memory".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.database.path, "/var/lib/ratchet.db");
        assert_eq!(config.agent.max_iterations, 25);
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.secrets.backend, "memory");
    }

    #[test]
    fn bad_env_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "RATCHET_GATEWAY_PORT").then(|| "http".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn invalid_threshold_rejected() {
        let mut config = AppConfig::default();
        config.agent.context.compaction_threshold = 1.5;
        assert!(config.validate().is_err());
        config.agent.context.compaction_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn exec_timeouts_are_capped() {
        let mut config = AppConfig::default();
        config.tools.max_exec_timeout_secs = 600;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tools.exec_timeout_secs = 301;
        assert!(config.validate().is_err());
    }

    #[test]
    fn small_sse_buffer_rejected() {
        let mut config = AppConfig::default();
        config.gateway.sse_buffer = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_secrets_backend_rejected() {
        let mut config = AppConfig::default();
        config.secrets.backend = "vault".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn home_expansion() {
        assert_eq!(expand_home("/abs/path.db"), PathBuf::from("/abs/path.db"));
        assert!(expand_home("~/x.db").ends_with("x.db"));
        assert!(!expand_home("~/x.db").starts_with("~"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("42618"));
        assert!(toml_str.contains("RATCHET_SECRET_"));
    }
}
