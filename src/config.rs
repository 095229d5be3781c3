use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Args;
use crate::notify::telegram::TELEGRAM_API_URL;
use crate::watcher::{DEFAULT_ERROR_PATTERN, DEFAULT_INTERVAL, WatcherOptions};

/// Contents of the optional TOML config file. Keys mirror the long
/// command line options with dashes replaced by underscores.
#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub interval: Option<u64>,
    #[serde(default)]
    pub label_enable: bool,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_url: Option<String>,
    #[serde(default)]
    pub error_patterns: Vec<String>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to read config file {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("missing required argument(s): {}", flag_list(.0))]
    MissingArgs(Vec<&'static str>),
    #[error("--interval must be at least 1 second")]
    ZeroInterval,
}

fn flag_list(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("--{name}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConfigFile {
    fn try_init_from_string(val: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(val)?)
    }

    pub fn try_init(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::try_init_from_string(&contents)
    }
}

/// Fully resolved settings for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub interval: Duration,
    pub label_enable: bool,
    pub telegram_token: String,
    pub telegram_chat_id: String,
    pub telegram_api_url: String,
    pub error_patterns: Vec<String>,
    pub debug: bool,
}

impl Config {
    pub fn try_init(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => ConfigFile::try_init(path)?,
            None => ConfigFile::default(),
        };
        Self::merge(args, file)
    }

    /// Command line values win; flags are on if either source turns them on.
    fn merge(args: &Args, file: ConfigFile) -> Result<Self, ConfigError> {
        let telegram_token = args.telegram_token.clone().or(file.telegram_token);
        let telegram_chat_id = args.telegram_chat_id.clone().or(file.telegram_chat_id);

        let (telegram_token, telegram_chat_id) = match (telegram_token, telegram_chat_id) {
            (Some(token), Some(chat_id)) => (token, chat_id),
            (token, chat_id) => {
                let mut missing = Vec::new();
                if token.is_none() {
                    missing.push("telegram-token");
                }
                if chat_id.is_none() {
                    missing.push("telegram-chat-id");
                }
                return Err(ConfigError::MissingArgs(missing));
            }
        };

        let interval = match args.interval.or(file.interval) {
            Some(0) => return Err(ConfigError::ZeroInterval),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_INTERVAL,
        };

        let error_patterns = if !args.error_patterns.is_empty() {
            args.error_patterns.clone()
        } else if !file.error_patterns.is_empty() {
            file.error_patterns
        } else {
            vec![DEFAULT_ERROR_PATTERN.to_string()]
        };

        Ok(Self {
            interval,
            label_enable: args.label_enable || file.label_enable,
            telegram_token,
            telegram_chat_id,
            telegram_api_url: args
                .telegram_api_url
                .clone()
                .or(file.telegram_api_url)
                .unwrap_or_else(|| TELEGRAM_API_URL.to_string()),
            error_patterns,
            debug: args.debug || file.debug,
        })
    }

    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            interval: self.interval,
            error_patterns: self.error_patterns.clone(),
        }
    }
}
