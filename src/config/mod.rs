//! Configuration management.
//!
//! Settings are resolved per key with the priority
//! **environment variable > config file > default**. The config file lives at
//! `~/.itemmatch/config.json` (overridable with `ITEMMATCH_CONFIG`) and is
//! managed by `itemmatch config show|set|reset`. CLI flags are applied on top
//! of the resolved values by the command layer.
//!
//! | env var                  | file key        | default                    |
//! |--------------------------|-----------------|----------------------------|
//! | `EMBEDDING_CONCURRENCY`  | `concurrency`   | 100                        |
//! | `EMBEDDING_BATCH_SIZE`   | `batch_size`    | 200                        |
//! | `EMBEDDING_ASYNC`        | `async`         | true                       |
//! | `API_EMBED_TIMEOUT_SECS` | `timeout_secs`  | 45                         |
//! | `API_EMBED_MAX_FAILURES` | `max_failures`  | 3                          |
//! | `MODEL_FALLBACK_MODE`    | `mode`          | auto                       |
//! | `DEEPINFRA_API_KEY`      | `api_key`       | none                       |
//! | `DEEPINFRA_PRIORITY`     | `priority`      | false                      |
//! | `EMBEDDING_ENDPOINT`     | `endpoint`      | DeepInfra OpenAI endpoint  |
//! | `EMBEDDING_MODEL`        | `model`         | `BAAI/bge-large-en-v1.5`   |
//! | `LOCAL_EMBEDDING_MODEL`  | `local_model`   | `BAAI/bge-large-en-v1.5`   |

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embeddings::remote::RemoteOptions;
use crate::embeddings::scheduler::{BatchPlan, MAX_BATCH_SIZE};
use crate::embeddings::types::{OperatingMode, local_models, remote_models};
use crate::error::{Error, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "ITEMMATCH_CONFIG";

/// Keys accepted by `itemmatch config set`.
pub const CONFIG_KEYS: &[&str] = &[
    "concurrency",
    "batch_size",
    "async",
    "timeout_secs",
    "max_failures",
    "mode",
    "api_key",
    "priority",
    "endpoint",
    "model",
    "local_model",
];

/// Get the global config directory (`~/.itemmatch`).
#[must_use]
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".itemmatch"))
}

/// Get the config file path.
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    global_config_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

/// The persisted file layer. Every field is optional; unset fields fall
/// through to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(rename = "async", skip_serializing_if = "Option::is_none")]
    pub use_async: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_failures: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_model: Option<String>,
}

impl ConfigFile {
    /// Load from `path`; a missing file is an empty config.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))
    }

    /// Set one key from its string form, validating the value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = normalize_key(key);
        match key.as_str() {
            "concurrency" => self.concurrency = Some(parse_number(&key, value)?),
            "batch_size" => self.batch_size = Some(parse_number(&key, value)?),
            "async" => self.use_async = Some(parse_bool(&key, value)?),
            "timeout_secs" => self.timeout_secs = Some(parse_number(&key, value)?),
            "max_failures" => self.max_failures = Some(parse_number(&key, value)?),
            "mode" => {
                parse_mode(&key, value)?;
                self.mode = Some(value.trim().to_string());
            }
            "api_key" => self.api_key = Some(value.trim().to_string()),
            "priority" => self.priority = Some(parse_bool(&key, value)?),
            "endpoint" => self.endpoint = Some(value.trim().to_string()),
            "model" => self.model = Some(value.trim().to_string()),
            "local_model" => self.local_model = Some(value.trim().to_string()),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "Unknown config key '{key}'. Valid keys: {}",
                    CONFIG_KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Clear one key.
    pub fn unset(&mut self, key: &str) -> Result<()> {
        match normalize_key(key).as_str() {
            "concurrency" => self.concurrency = None,
            "batch_size" => self.batch_size = None,
            "async" => self.use_async = None,
            "timeout_secs" => self.timeout_secs = None,
            "max_failures" => self.max_failures = None,
            "mode" => self.mode = None,
            "api_key" => self.api_key = None,
            "priority" => self.priority = None,
            "endpoint" => self.endpoint = None,
            "model" => self.model = None,
            "local_model" => self.local_model = None,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "Unknown config key '{other}'"
                )));
            }
        }
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('-', "_")
}

/// Load the config file from the default location.
pub fn load_config() -> Result<ConfigFile> {
    ConfigFile::load_from(&config_path()?)
}

/// Parse a boolean flag: `1/true/yes/on` or `0/false/no/off`.
pub fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean (1/true/yes/on or 0/false/no/off), got '{value}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a non-negative integer, got '{value}'")))
}

fn parse_mode(name: &str, value: &str) -> Result<OperatingMode> {
    value
        .parse()
        .map_err(|e: String| Error::Config(format!("{name}: {e}")))
}

/// Fully resolved settings for a matching run.
#[derive(Clone, PartialEq, Eq)]
pub struct MatchSettings {
    pub concurrency: usize,
    pub batch_size: usize,
    pub use_async: bool,
    pub timeout_secs: u64,
    pub max_failures: u32,
    pub mode: OperatingMode,
    pub api_key: Option<String>,
    pub priority: bool,
    pub endpoint: String,
    pub model: String,
    pub local_model: String,
}

impl std::fmt::Debug for MatchSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSettings")
            .field("concurrency", &self.concurrency)
            .field("batch_size", &self.batch_size)
            .field("use_async", &self.use_async)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_failures", &self.max_failures)
            .field("mode", &self.mode)
            .field("api_key", &self.api_key.as_ref().map(|_| "[set]"))
            .field("priority", &self.priority)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("local_model", &self.local_model)
            .finish()
    }
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 100,
            batch_size: 200,
            use_async: true,
            timeout_secs: 45,
            max_failures: 3,
            mode: OperatingMode::Auto,
            api_key: None,
            priority: false,
            endpoint: remote_models::DEFAULT_ENDPOINT.to_string(),
            model: remote_models::default_config().name,
            local_model: local_models::default_config().name,
        }
    }
}

impl MatchSettings {
    /// Resolve from the process environment and the default config file.
    pub fn resolve() -> Result<Self> {
        let file = load_config()?;
        Self::resolve_with(|name| std::env::var(name).ok(), &file)
    }

    /// Resolve from an arbitrary variable lookup and file layer.
    ///
    /// Empty variables count as unset.
    pub fn resolve_with<F>(lookup: F, file: &ConfigFile) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let concurrency = match env("EMBEDDING_CONCURRENCY") {
            Some(v) => parse_number("EMBEDDING_CONCURRENCY", &v)?,
            None => file.concurrency.unwrap_or(defaults.concurrency),
        };
        let batch_size = match env("EMBEDDING_BATCH_SIZE") {
            Some(v) => parse_number("EMBEDDING_BATCH_SIZE", &v)?,
            None => file.batch_size.unwrap_or(defaults.batch_size),
        };
        let use_async = match env("EMBEDDING_ASYNC") {
            Some(v) => parse_bool("EMBEDDING_ASYNC", &v)?,
            None => file.use_async.unwrap_or(defaults.use_async),
        };
        let timeout_secs = match env("API_EMBED_TIMEOUT_SECS") {
            Some(v) => parse_number("API_EMBED_TIMEOUT_SECS", &v)?,
            None => file.timeout_secs.unwrap_or(defaults.timeout_secs),
        };
        let max_failures = match env("API_EMBED_MAX_FAILURES") {
            Some(v) => parse_number("API_EMBED_MAX_FAILURES", &v)?,
            None => file.max_failures.unwrap_or(defaults.max_failures),
        };
        let mode = match env("MODEL_FALLBACK_MODE") {
            Some(v) => parse_mode("MODEL_FALLBACK_MODE", &v)?,
            None => match &file.mode {
                Some(v) => parse_mode("mode", v)?,
                None => defaults.mode,
            },
        };
        let api_key = env("DEEPINFRA_API_KEY")
            .or_else(|| env("DEEPINFRA_TOKEN"))
            .or_else(|| file.api_key.clone().filter(|k| !k.trim().is_empty()));
        let priority = match env("DEEPINFRA_PRIORITY") {
            Some(v) => parse_bool("DEEPINFRA_PRIORITY", &v)?,
            None => file.priority.unwrap_or(defaults.priority),
        };
        let endpoint = env("EMBEDDING_ENDPOINT")
            .or_else(|| file.endpoint.clone())
            .unwrap_or(defaults.endpoint);
        let model = env("EMBEDDING_MODEL")
            .or_else(|| file.model.clone())
            .unwrap_or(defaults.model);
        let local_model = env("LOCAL_EMBEDDING_MODEL")
            .or_else(|| file.local_model.clone())
            .unwrap_or(defaults.local_model);

        Ok(Self {
            concurrency,
            batch_size,
            use_async,
            timeout_secs,
            max_failures,
            mode,
            api_key,
            priority,
            endpoint,
            model,
            local_model,
        })
    }

    /// In-flight batch bound after applying the async toggle.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        if self.use_async {
            self.concurrency.max(1)
        } else {
            1
        }
    }

    #[must_use]
    pub fn batch_plan(&self) -> BatchPlan {
        BatchPlan::new(
            self.batch_size.clamp(1, MAX_BATCH_SIZE),
            self.effective_concurrency(),
        )
    }

    #[must_use]
    pub fn remote_options(&self) -> RemoteOptions {
        RemoteOptions {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            priority: self.priority,
            max_connections: self.concurrency.max(1),
            ..RemoteOptions::default()
        }
    }
}
