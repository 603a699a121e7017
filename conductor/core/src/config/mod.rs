//! TOML Configuration File Support
//!
//! Centralized configuration loading, supporting a TOML file at
//! `~/.config/chat-conductor/conductor.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [session]
//! system_prompt = "You are a concise assistant."
//! max_history_tokens = 30720
//!
//! [generation]
//! timeout_secs = 180
//! fallback_enabled = true
//! fallback_chunk_delay_ms = 50
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//! multiplier = 2
//!
//! [backend]
//! base_url = "https://dashscope.aliyuncs.com/compatible-mode/v1"
//! model = "qwen-plus"
//! temperature = 0.7
//! top_p = 0.9
//! request_timeout_secs = 120
//!
//! [storage]
//! upload_dir = "/var/lib/chat-conductor/uploads"
//!
//! [daemon]
//! socket_path = "/run/user/1000/chat-conductor/conductor.sock"
//! ```
//!
//! The API key can also come from the environment
//! (`DASHSCOPE_API_KEY` or `CONDUCTOR_API_KEY`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::OpenAiCompatConfig;
use crate::conductor::ConductorConfig;

/// Default maximum frame payload accepted by the daemon
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Seed for every new history
    pub system_prompt: Option<String>,
    /// History budget in estimated tokens
    pub max_history_tokens: Option<usize>,
}

/// `[generation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Cancel generations running longer than this
    pub timeout_secs: Option<u64>,
    /// Serve built-in canned answers
    pub fallback_enabled: Option<bool>,
    /// Pause between canned chunks
    pub fallback_chunk_delay_ms: Option<u64>,
}

/// `[retry]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Total attempts including the first
    pub max_attempts: Option<u32>,
    /// Backoff unit in milliseconds
    pub base_delay_ms: Option<u64>,
    /// Backoff growth factor
    pub multiplier: Option<u32>,
    /// Cap for one backoff in milliseconds
    pub max_delay_ms: Option<u64>,
}

/// `[backend]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// API root
    pub base_url: Option<String>,
    /// Bearer token (prefer the environment)
    pub api_key: Option<String>,
    /// Model identifier
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling
    pub top_p: Option<f32>,
    /// Maximum answer tokens (0 = backend default)
    pub max_tokens: Option<u32>,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
    /// Backend resends the full answer with each event
    pub cumulative_output: Option<bool>,
}

/// `[storage]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// Root directory for session files
    pub upload_dir: Option<PathBuf>,
}

/// `[daemon]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonToml {
    /// Unix socket path
    pub socket_path: Option<PathBuf>,
    /// Maximum frame payload in bytes
    pub max_frame_size: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorToml {
    /// Session section
    pub session: SessionToml,
    /// Generation section
    pub generation: GenerationToml,
    /// Retry section
    pub retry: RetryToml,
    /// Backend section
    pub backend: BackendToml,
    /// Storage section
    pub storage: StorageToml,
    /// Daemon section
    pub daemon: DaemonToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration, merged from every source
#[derive(Clone, Debug)]
pub struct ConductorSettings {
    /// Orchestrator configuration
    pub conductor: ConductorConfig,

    /// Backend connection
    pub backend: OpenAiCompatConfig,

    /// Root directory for session files
    pub upload_dir: PathBuf,

    /// Daemon socket path
    pub socket_path: PathBuf,

    /// Maximum frame payload accepted by the daemon
    pub max_frame_size: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ConductorSettings {
    fn default() -> Self {
        Self {
            conductor: ConductorConfig::default(),
            backend: OpenAiCompatConfig::default(),
            upload_dir: default_upload_dir(),
            socket_path: default_socket_path(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ConductorSettings {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conductor = &self.conductor;
        if conductor.max_history_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_history_tokens must be greater than 0".to_string(),
            ));
        }
        if conductor.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if conductor.generation_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "generation timeout must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&conductor.model.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "temperature {} is outside 0.0-2.0",
                conductor.model.temperature
            )));
        }
        if !(0.0..=1.0).contains(&conductor.model.top_p) {
            return Err(ConfigError::ValidationError(format!(
                "top_p {} is outside 0.0-1.0",
                conductor.model.top_p
            )));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend base_url must not be empty".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_frame_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-conductor/conductor.toml` or
/// `~/.config/chat-conductor/conductor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-conductor").join("conductor.toml"))
}

/// Default socket path, under the user runtime directory when there is one
#[must_use]
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("chat-conductor")
        .join("conductor.sock")
}

/// Default root for session files
#[must_use]
pub fn default_upload_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("chat-conductor")
        .join("uploads")
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// merged values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<ConductorSettings, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// If `path` is `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ConductorSettings, ConfigError> {
    load_config_with_env(path.as_deref(), |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `env`
///
/// # Errors
///
/// As [`load_config_from_path`].
pub fn load_config_with_env(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ConductorSettings, ConfigError> {
    let mut config = ConductorSettings::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;

            let toml_config: ConductorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.to_path_buf());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ConductorSettings, toml: &ConductorToml) {
    let conductor = &mut config.conductor;

    // Session settings
    if let Some(prompt) = &toml.session.system_prompt {
        conductor.system_prompt.clone_from(prompt);
    }
    if let Some(tokens) = toml.session.max_history_tokens {
        conductor.max_history_tokens = tokens;
    }

    // Generation settings
    if let Some(secs) = toml.generation.timeout_secs {
        conductor.generation_timeout = Duration::from_secs(secs);
    }
    if let Some(enabled) = toml.generation.fallback_enabled {
        conductor.fallback_enabled = enabled;
    }
    if let Some(ms) = toml.generation.fallback_chunk_delay_ms {
        conductor.fallback_chunk_delay = Duration::from_millis(ms);
    }

    // Retry settings
    if let Some(attempts) = toml.retry.max_attempts {
        conductor.retry.max_attempts = attempts;
    }
    if let Some(ms) = toml.retry.base_delay_ms {
        conductor.retry.base_delay = Duration::from_millis(ms);
    }
    if let Some(multiplier) = toml.retry.multiplier {
        conductor.retry.multiplier = multiplier;
    }
    if let Some(ms) = toml.retry.max_delay_ms {
        conductor.retry.max_delay = Duration::from_millis(ms);
    }

    // Backend settings
    if let Some(model) = &toml.backend.model {
        conductor.model.model.clone_from(model);
    }
    if let Some(temperature) = toml.backend.temperature {
        conductor.model.temperature = temperature;
    }
    if let Some(top_p) = toml.backend.top_p {
        conductor.model.top_p = top_p;
    }
    if let Some(max_tokens) = toml.backend.max_tokens {
        conductor.model.max_tokens = max_tokens;
    }
    if let Some(url) = &toml.backend.base_url {
        config.backend.base_url.clone_from(url);
    }
    if toml.backend.api_key.is_some() {
        config.backend.api_key.clone_from(&toml.backend.api_key);
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.backend.request_timeout = Duration::from_secs(secs);
    }
    if let Some(cumulative) = toml.backend.cumulative_output {
        config.backend.cumulative_output = cumulative;
    }

    // Storage and daemon settings
    if let Some(dir) = &toml.storage.upload_dir {
        config.upload_dir.clone_from(dir);
    }
    if let Some(path) = &toml.daemon.socket_path {
        config.socket_path.clone_from(path);
    }
    if let Some(size) = toml.daemon.max_frame_size {
        config.max_frame_size = size;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ConductorSettings, env: impl Fn(&str) -> Option<String>) {
    let mut touched = false;

    if let Some(prompt) = env("CONDUCTOR_SYSTEM_PROMPT") {
        config.conductor.system_prompt = prompt;
        touched = true;
    }
    if let Some(tokens) = env("CONDUCTOR_MAX_HISTORY_TOKENS").and_then(|v| v.parse().ok()) {
        config.conductor.max_history_tokens = tokens;
        touched = true;
    }
    if let Some(secs) = env("CONDUCTOR_GENERATION_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.conductor.generation_timeout = Duration::from_secs(secs);
        touched = true;
    }
    if let Some(enabled) = env("CONDUCTOR_FALLBACK") {
        config.conductor.fallback_enabled = enabled != "0" && enabled.to_lowercase() != "false";
        touched = true;
    }
    if let Some(attempts) = env("CONDUCTOR_RETRY_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.conductor.retry.max_attempts = attempts;
        touched = true;
    }
    if let Some(model) = env("CONDUCTOR_MODEL") {
        config.conductor.model.model = model;
        touched = true;
    }
    if let Some(url) = env("CONDUCTOR_BASE_URL") {
        config.backend.base_url = url;
        touched = true;
    }
    if let Some(key) = env("CONDUCTOR_API_KEY").or_else(|| env("DASHSCOPE_API_KEY")) {
        config.backend.api_key = Some(key);
        touched = true;
    }
    if let Some(dir) = env("CONDUCTOR_UPLOAD_DIR") {
        config.upload_dir = PathBuf::from(dir);
        touched = true;
    }
    if let Some(path) = env("CONDUCTOR_SOCKET") {
        config.socket_path = PathBuf::from(path);
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Socket path override
    pub socket_path: Option<PathBuf>,

    /// Model override
    pub model: Option<String>,

    /// Backend URL override
    pub base_url: Option<String>,

    /// Upload directory override
    pub upload_dir: Option<PathBuf>,

    /// History budget override
    pub max_history_tokens: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set socket path override
    #[must_use]
    pub fn with_socket_path(mut self, path: PathBuf) -> Self {
        self.socket_path = Some(path);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Set backend URL override
    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set upload directory override
    #[must_use]
    pub fn with_upload_dir(mut self, dir: PathBuf) -> Self {
        self.upload_dir = Some(dir);
        self
    }

    /// Set history budget override
    #[must_use]
    pub fn with_max_history_tokens(mut self, tokens: usize) -> Self {
        self.max_history_tokens = Some(tokens);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.socket_path.is_none()
            && self.model.is_none()
            && self.base_url.is_none()
            && self.upload_dir.is_none()
            && self.max_history_tokens.is_none()
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Fails if the overridden values are invalid.
    pub fn apply(&self, config: &mut ConductorSettings) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        if let Some(path) = &self.socket_path {
            config.socket_path.clone_from(path);
        }
        if let Some(model) = &self.model {
            config.conductor.model.model.clone_from(model);
        }
        if let Some(url) = &self.base_url {
            config.backend.base_url.clone_from(url);
        }
        if let Some(dir) = &self.upload_dir {
            config.upload_dir.clone_from(dir);
        }
        if let Some(tokens) = self.max_history_tokens {
            config.conductor.max_history_tokens = tokens;
        }
        config.source = ConfigSource::Cli;
        config.validate()
    }
}
