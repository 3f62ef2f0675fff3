use std::time::Duration;

pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8080;

pub const DEFAULT_PRESENCE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_PRESENCE_GRACE_PERIOD: Duration = Duration::from_secs(30);

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_GEOCODER_TIMEOUT: Duration = Duration::from_secs(5);

/// Files probed, in order, when no config path is given
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["convoy.toml", "config/convoy.toml"];

pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:5173"];
