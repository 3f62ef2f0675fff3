use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{parse_bool_var, parse_csv_var};

/// Raw configuration as defined in a TOML file. Durations are humantime
/// strings such as `"30s"` or `"1m 30s"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub presence: FilePresenceConfig,
    #[serde(default)]
    pub fanout: FileFanoutConfig,
    #[serde(default)]
    pub locks: FileLockConfig,
    #[serde(default)]
    pub geocoder: FileGeocoderConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePresenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFanoutConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_buffer: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLockConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileGeocoderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub presence_interval: Option<String>,
    pub presence_ttl: Option<String>,
    pub presence_grace_period: Option<String>,
    pub subscriber_buffer: Option<usize>,
    pub lock_timeout: Option<String>,
    pub geocoder_enabled: Option<bool>,
    pub geocoder_base_url: Option<String>,
    pub geocoder_user_agent: Option<String>,
    pub geocoder_timeout: Option<String>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub dev_mode: Option<bool>,
    pub config_path: Option<PathBuf>,
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            server_host: non_empty_var("SERVER_HOST"),
            server_port: non_empty_var("SERVER_PORT").and_then(|s| s.trim().parse().ok()),
            presence_interval: non_empty_var("PRESENCE_INTERVAL"),
            presence_ttl: non_empty_var("PRESENCE_TTL"),
            presence_grace_period: non_empty_var("PRESENCE_GRACE_PERIOD"),
            subscriber_buffer: non_empty_var("FANOUT_SUBSCRIBER_BUFFER")
                .and_then(|s| s.trim().parse().ok()),
            lock_timeout: non_empty_var("LOCK_TIMEOUT"),
            geocoder_enabled: parse_bool_var("GEOCODER_ENABLED"),
            geocoder_base_url: non_empty_var("GEOCODER_BASE_URL"),
            geocoder_user_agent: non_empty_var("GEOCODER_USER_AGENT"),
            geocoder_timeout: non_empty_var("GEOCODER_TIMEOUT"),
            cors_allowed_origins: parse_csv_var("CORS_ALLOWED_ORIGINS"),
            dev_mode: parse_bool_var("DEV_MODE"),
            config_path: non_empty_var("CONVOY_CONFIG_PATH").map(PathBuf::from),
        }
    }
}
