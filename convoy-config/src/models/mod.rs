pub mod sources;

use std::{path::PathBuf, time::Duration};

use convoy_core::{
    PresenceSettings, ServiceSettings,
    geocode::{DEFAULT_NOMINATIM_URL, DEFAULT_USER_AGENT},
};
use url::Url;

use crate::constants::*;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub presence: PresenceConfig,
    pub fanout: FanoutConfig,
    pub locks: LockConfig,
    pub geocoder: GeocoderConfig,
    pub cors: CorsConfig,
    pub dev_mode: bool,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn presence_settings(&self) -> PresenceSettings {
        PresenceSettings {
            interval: self.presence.interval,
            ttl: self.presence.ttl,
            grace_period: self.presence.grace_period,
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            lock_timeout: self.locks.timeout,
            subscriber_buffer: self.fanout.subscriber_buffer,
            lookup_timeout: self.geocoder.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub interval: Duration,
    pub ttl: Duration,
    pub grace_period: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PRESENCE_INTERVAL,
            ttl: DEFAULT_PRESENCE_TTL,
            grace_period: DEFAULT_PRESENCE_GRACE_PERIOD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    pub subscriber_buffer: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub enabled: bool,
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl GeocoderConfig {
    pub fn parsed_base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(self.base_url.trim())
    }
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_NOMINATIM_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_GEOCODER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins
            .iter()
            .any(|origin| origin.trim() == "*")
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
