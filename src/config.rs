// Config store: a small JSON file under the user's config directory holding
// the API token plus optional defaults. `Settings` is the resolved view
// (config + environment + flags) handed to the rest of the program.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://mineru.net";
pub const DEFAULT_OUTPUT_DIR: &str = "./output";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

/// Persisted configuration. Every field besides the token is an optional
/// default; `token` is accepted as a legacy key for `api_token`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "token")]
    pub api_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Returns a copy of this config carrying the token the user typed.
    pub fn with_token(&self, raw: &str) -> Result<Config, ConfigError> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        Ok(Config {
            api_token: token.to_string(),
            ..self.clone()
        })
    }

    pub fn token(&self) -> Option<&str> {
        let t = self.api_token.trim();
        (!t.is_empty()).then_some(t)
    }
}

/// Location of the config file plus load/save.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$MINERU_CONFIG`, else `<config dir>/mineru/config.json`.
    pub fn default_location() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os("MINERU_CONFIG") {
            return Ok(Self::new(path));
        }
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::new(dir.join("mineru").join("config.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no config file exists yet.
    pub fn load(&self) -> Result<Option<Config>, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "Loaded config");
        Ok(Some(config))
    }

    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let content = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, content).map_err(io_err)?;
        debug!(path = %self.path.display(), "Saved config");
        Ok(())
    }
}

/// Values the commands actually run with.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub token: Option<String>,
    pub base_url: String,
    pub output_dir: PathBuf,
    pub model: String,
    pub language: String,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Settings {
    /// Environment variables win over the config file, which wins over
    /// built-in defaults. `env` is injected so resolution stays pure.
    pub fn resolve(config: &Config, env: impl Fn(&str) -> Option<String>) -> Settings {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let token = non_empty("MINERU_API_TOKEN")
            .or_else(|| non_empty("MINERU_API_KEY"))
            .or_else(|| config.token().map(str::to_string));
        let base_url = non_empty("MINERU_API_BASE")
            .or_else(|| config.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let output_dir = non_empty("MINERU_OUTPUT_DIR")
            .map(PathBuf::from)
            .or_else(|| config.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        Settings {
            token,
            base_url,
            output_dir,
            model: config.model.clone().unwrap_or_else(|| "vlm".into()),
            language: config.language.clone().unwrap_or_else(|| "ch".into()),
            poll_interval: config
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            max_wait: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MAX_WAIT),
        }
    }

    pub fn from_process_env(config: &Config) -> Settings {
        Settings::resolve(config, |key| std::env::var(key).ok())
    }
}

/// Shortens a token for display.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 25 {
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 10..].iter().collect();
        format!("{head}...{tail}")
    } else {
        let head: String = chars.iter().take(4).collect();
        format!("{head}...")
    }
}
