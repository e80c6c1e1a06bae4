use clap::Parser;
use lib_sentinel::{ConnectorOptions, LoggerLocalOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Headless perimeter telemetry monitor", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SENTINEL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SENTINEL_PUSH_URL", help = "WebSocket endpoint of the push transport (ws:// or wss://).")]
    pub push_url: Option<String>,

    #[clap(long, env = "SENTINEL_PULL_URL", help = "HTTP endpoint of the pull transport.")]
    pub pull_url: Option<String>,

    #[clap(long, env = "SENTINEL_PREFER_PUSH", help = "Try the push transport before falling back to pull.")]
    pub prefer_push: Option<bool>,

    #[clap(long, env = "SENTINEL_UPDATE_FREQUENCY", help = "Pull polls per second.")]
    pub update_frequency: Option<f64>,

    #[clap(long, env = "SENTINEL_MAX_RECONNECT_ATTEMPTS", help = "Push reconnect attempts before falling back to pull.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "SENTINEL_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for push reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "SENTINEL_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for push reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "SENTINEL_REQUEST_TIMEOUT_MS", help = "Timeout in milliseconds for a push handshake or a pull request.")]
    pub request_timeout_ms: Option<u64>,

    #[clap(long, env = "SENTINEL_PULL_AUTH_TOKEN", help = "Bearer token sent with pull requests.")]
    pub pull_auth_token: Option<String>,

    #[clap(long, env = "SENTINEL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SENTINEL_LOG_LEVEL", help = "Console log filter (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SENTINEL_FILE_LOG_LEVEL", help = "File log filter. Unset disables file logging.")]
    pub file_log_level: Option<String>,
}

impl Config {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            push_url: other.push_url.or(self.push_url),
            pull_url: other.pull_url.or(self.pull_url),
            prefer_push: other.prefer_push.or(self.prefer_push),
            update_frequency: other.update_frequency.or(self.update_frequency),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            pull_auth_token: other.pull_auth_token.or(self.pull_auth_token),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            file_log_level: other.file_log_level.or(self.file_log_level),
        }
    }

    pub fn defaults() -> Config {
        let base = ConnectorOptions::default();
        Config {
            prefer_push: Some(base.prefer_push),
            update_frequency: Some(base.update_frequency),
            max_reconnect_attempts: Some(base.max_reconnect_attempts),
            reconnect_base_delay_ms: Some(base.reconnect_base_delay_ms),
            reconnect_max_delay_ms: Some(base.reconnect_max_delay_ms),
            request_timeout_ms: Some(base.request_timeout_ms),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    pub fn connector_options(&self) -> ConnectorOptions {
        let base = ConnectorOptions::default();
        ConnectorOptions {
            push_url: self.push_url.clone(),
            pull_url: self.pull_url.clone(),
            prefer_push: self.prefer_push.unwrap_or(base.prefer_push),
            update_frequency: self.update_frequency.unwrap_or(base.update_frequency),
            max_reconnect_attempts: self.max_reconnect_attempts.unwrap_or(base.max_reconnect_attempts),
            reconnect_base_delay_ms: self.reconnect_base_delay_ms.unwrap_or(base.reconnect_base_delay_ms),
            reconnect_max_delay_ms: self.reconnect_max_delay_ms.unwrap_or(base.reconnect_max_delay_ms),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(base.request_timeout_ms),
            pull_auth_token: self.pull_auth_token.clone(),
            ..base
        }
    }

    pub fn logger_options(&self) -> LoggerLocalOptions {
        LoggerLocalOptions {
            tty_level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
            file_level: self.file_log_level.clone(),
            log_dir: self.log_dir.clone(),
            ..Default::default()
        }
    }
}

/// Reads a JSON config file. Missing or unreadable files yield `None` with a
/// note on stderr; logging is not up yet when this runs.
fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        eprintln!("Config file not found at {}. Using defaults and environment/CLI values.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<Config>(&text) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Failed to parse config file {}: {}. Ignoring it.", path.display(), e);
                None
            }
        },
        Err(e) => {
            eprintln!("Failed to read config file {}: {}. Ignoring it.", path.display(), e);
            None
        }
    }
}

/// Layers, lowest priority first: built-in defaults, the JSON file, then
/// environment (including `.env`) and CLI flags.
pub fn resolve(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("sentinel_monitor.json"));

    let mut current = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current = current.merge(file_config);
    }
    current.merge(cli)
}

pub fn load_config() -> Config {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    resolve(Config::parse())
}
