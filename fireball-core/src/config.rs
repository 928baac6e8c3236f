//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/fireball/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/fireball/` (~/.config/fireball/)
//! - Data: `$XDG_DATA_HOME/fireball/` (~/.local/share/fireball/)
//! - State/Logs: `$XDG_STATE_HOME/fireball/` (~/.local/state/fireball/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Loader settings
    #[serde(default)]
    pub load: LoadConfig,

    /// Cleaning and classification settings
    #[serde(default)]
    pub cleaning: CleaningConfig,

    /// Text-completion endpoint (optional, only used by the `llm` provider)
    #[serde(default)]
    pub llm: Option<LlmConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Record loader configuration
#[derive(Debug, Deserialize)]
pub struct LoadConfig {
    /// Records committed per transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

/// Which suggestion provider the cleaning passes use
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic rules, no network
    #[default]
    Heuristic,
    /// Text-completion endpoint from `[llm]`
    Llm,
}

/// Cleaning pass configuration
#[derive(Debug, Deserialize)]
pub struct CleaningConfig {
    /// Suggestion provider
    #[serde(default)]
    pub provider: ProviderKind,

    /// Minimum confidence (0-100) for a suggestion to be applied
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,

    /// Attack names at least this long are sent for cleaning
    #[serde(default = "default_attack_min_length")]
    pub attack_min_length: usize,

    /// Suggestions are flushed to disk every N items
    #[serde(default = "default_save_every")]
    pub save_every: usize,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            min_confidence: default_min_confidence(),
            attack_min_length: default_attack_min_length(),
            save_every: default_save_every(),
        }
    }
}

impl CleaningConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.min_confidence > 100 {
            return Err(Error::Config(
                "cleaning.min_confidence must be between 0 and 100".to_string(),
            ));
        }
        if self.save_every == 0 {
            return Err(Error::Config(
                "cleaning.save_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_min_confidence() -> u8 {
    80
}

fn default_attack_min_length() -> usize {
    40
}

fn default_save_every() -> usize {
    10
}

/// LLM provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider type
    pub provider: LlmProvider,
    /// Model to use
    pub model: String,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_timeout() -> u64 {
    15
}

/// Supported LLM providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Claude,
    /// OpenAI or any compatible server (LM Studio)
    OpenAI,
}

impl LlmProvider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Claude => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com",
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;

        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        if self.load.batch_size == 0 {
            return Err(Error::Config(
                "load.batch_size must be at least 1".to_string(),
            ));
        }
        self.cleaning.validate()?;
        if self.cleaning.provider == ProviderKind::Llm && self.llm.is_none() {
            return Err(Error::Config(
                "cleaning.provider = \"llm\" requires an [llm] section".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/fireball/config.toml` (~/.config/fireball/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("fireball").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/fireball/` (~/.local/share/fireball/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("fireball")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/fireball/` (~/.local/state/fireball/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("fireball")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/fireball/fireball.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("fireball.db")
    }

    /// Returns the default extract file path
    ///
    /// `$XDG_DATA_HOME/fireball/fireball.extract.db`
    pub fn extract_path() -> PathBuf {
        Self::data_dir().join("fireball.extract.db")
    }

    /// Returns the default suggestions file for an advisor
    /// (`attack_suggestions.json`, `race_suggestions.json`).
    pub fn suggestions_path(name: &str) -> PathBuf {
        Self::data_dir().join(format!("{name}_suggestions.json"))
    }

    /// Returns the directory holding the per-binary log files
    ///
    /// `$XDG_STATE_HOME/fireball/`
    pub fn log_dir() -> PathBuf {
        Self::state_dir()
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
