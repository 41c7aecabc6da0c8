//! Configuration management for PostFlow.
//!
//! Configuration is read from `~/.config/postflow/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.
//! Secrets may also come from the environment, which wins over the file.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Duration;
use url::Url;

use crate::lifecycle::LifecycleSettings;
use crate::splitter::{SplitLimits, DEFAULT_MAX_SEGMENTS, DEFAULT_UNIT_LIMIT, MAX_THREAD_SEGMENTS};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub operator: OperatorConfig,
    pub posting: PostingConfig,
    pub publisher: PublisherConfig,
    pub generator: GeneratorConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Owner marker for topic presets.
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostingConfig {
    pub unit_limit: usize,
    pub max_segments: usize,
    pub min_lead_secs: u64,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            unit_limit: DEFAULT_UNIT_LIMIT,
            max_segments: DEFAULT_MAX_SEGMENTS,
            min_lead_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub api_base: String,
    pub upload_base: String,
    pub bearer_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.x.com".to_string(),
            upload_base: "https://api.x.com".to_string(),
            bearer_token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-5-mini".to_string(),
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Config {
    /// Load configuration from the default path, then apply environment overrides.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_config_path()?)
    }

    /// Same as [`load`](Self::load) for an explicit path.
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
                path: config_path.to_path_buf(),
                source: e,
            })?;
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: config_path.to_path_buf(),
                source: e,
            })?
        } else {
            Self::create_default_config(config_path)?;
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path: `~/.config/postflow/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("postflow").join("config.toml"))
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = var("X_BEARER_TOKEN") {
            self.publisher.bearer_token = Some(token);
        }
        if let Some(key) = var("OPENAI_API_KEY") {
            self.generator.api_key = Some(key);
        }
        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.notifier.telegram_bot_token = Some(token);
        }
        if let Some(chat) = var("TELEGRAM_CHAT_ID") {
            self.notifier.telegram_chat_id = Some(chat);
        }
        if let Some(path) = var("POSTFLOW_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(id) = var("POSTFLOW_OPERATOR_ID") {
            match id.trim().parse() {
                Ok(id) => self.operator.id = id,
                Err(_) => tracing::warn!("Ignoring non-numeric POSTFLOW_OPERATOR_ID: {}", id),
            }
        }
    }

    /// Reject values that would only fail later at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("publisher.api_base", &self.publisher.api_base),
            ("publisher.upload_base", &self.publisher.upload_base),
            ("generator.api_base", &self.generator.api_base),
        ] {
            Url::parse(value)
                .map_err(|e| ConfigError::Invalid(format!("{} = {:?}: {}", key, value, e)))?;
        }

        // Below this the "(99/99)" reservation leaves no room for text.
        if self.posting.unit_limit < 20 {
            return Err(ConfigError::Invalid(format!(
                "posting.unit_limit must be at least 20 (got {})",
                self.posting.unit_limit
            )));
        }
        if self.posting.max_segments == 0 || self.posting.max_segments > MAX_THREAD_SEGMENTS {
            return Err(ConfigError::Invalid(format!(
                "posting.max_segments must be between 1 and 99 (got {})",
                self.posting.max_segments
            )));
        }
        Ok(())
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            limits: SplitLimits {
                unit_limit: self.posting.unit_limit,
                max_segments: self.posting.max_segments,
            },
            min_lead: Duration::seconds(self.posting.min_lead_secs as i64),
        }
    }

    /// Configured database path, or `<data dir>/postflow/postflow.db`.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        let postflow_dir = data_dir.join("postflow");
        fs::create_dir_all(&postflow_dir).map_err(|e| ConfigError::Io {
            path: postflow_dir.clone(),
            source: e,
        })?;
        Ok(postflow_dir.join("postflow.db"))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# PostFlow Configuration
#
# Secrets can be left out of this file and supplied through the environment:
# X_BEARER_TOKEN, OPENAI_API_KEY, TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID.
# POSTFLOW_DATABASE_PATH and POSTFLOW_OPERATOR_ID override the values below.

[database]
# SQLite database file (default: <data dir>/postflow/postflow.db)
# path = "/var/lib/postflow/postflow.db"

[operator]
# Owner id for topic presets
id = 0

[posting]
# Characters per published unit; longer text becomes a numbered thread
unit_limit = 280

# Longest thread a post may split into
max_segments = 25

# Due times must be at least this many seconds in the future
min_lead_secs = 0

[publisher]
api_base = "https://api.x.com"
upload_base = "https://api.x.com"
# bearer_token = "..."

# Request timeout for each publish call
timeout_secs = 30

[generator]
api_base = "https://api.openai.com/v1"
# api_key = "..."
model = "gpt-5-mini"
temperature = 0.7
max_tokens = 500

[notifier]
# Send publish outcomes to a Telegram chat
# telegram_bot_token = "..."
# telegram_chat_id = "..."
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
