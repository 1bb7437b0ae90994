use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use reqwest::Url;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `api_key` from the config file.
pub const API_KEY_ENV: &str = "SEEKCHAT_API_KEY";

#[derive(Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Ask the server for an event stream instead of one JSON document.
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// Skip TLS peer verification. Leaves the connection open to interception.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_endpoint() -> String {
    "https://api.deepseek.com/chat/completions".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_stream() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: String::new(),
            system_prompt: default_system_prompt(),
            stream: default_stream(),
            accept_invalid_certs: false,
            log_level: default_log_level(),
        }
    }
}

// The key never reaches logs through `{:?}`.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = if self.api_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &api_key)
            .field("system_prompt", &self.system_prompt)
            .field("stream", &self.stream)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Location of `config.toml` in the per-user config directory.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "seekchat", "seekchat")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads the per-user config file, or defaults when there is none.
    pub fn load() -> Result<Self> {
        if let Some(config_path) = Self::config_path() {
            if config_path.exists() {
                return Self::load_from(&config_path);
            }
        }
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Applies `SEEKCHAT_API_KEY` when it is set and non-empty.
    pub fn with_env_overrides(self) -> Self {
        self.with_api_key_override(std::env::var(API_KEY_ENV).ok())
    }

    fn with_api_key_override(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.api_key = key.trim().to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)
            .with_context(|| format!("endpoint is not a valid URL: {}", self.endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("endpoint must use http or https, got {}", url.scheme());
        }
        if self.model.trim().is_empty() {
            bail!("model name must not be empty");
        }
        Ok(())
    }
}
