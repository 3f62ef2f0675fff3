use axum::http::HeaderValue;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Config, CorsConfig};

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error(
        "PRESENCE_INTERVAL ({interval:?}) must be shorter than PRESENCE_TTL ({ttl:?}) or stale members are never evicted in time"
    )]
    IntervalNotBelowTtl { interval: Duration, ttl: Duration },
    #[error("FANOUT_SUBSCRIBER_BUFFER must be at least 1")]
    ZeroSubscriberBuffer,
    #[error("CORS wildcard origins are not allowed when DEV_MODE is false")]
    DangerousCorsWildcard,
    #[error("invalid CORS configuration: {reason}")]
    InvalidCorsConfig { reason: String },
    #[error("invalid GEOCODER_BASE_URL `{url}`: {reason}")]
    InvalidGeocoderUrl { url: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    for (field, value) in [
        ("PRESENCE_INTERVAL", config.presence.interval),
        ("PRESENCE_TTL", config.presence.ttl),
        ("PRESENCE_GRACE_PERIOD", config.presence.grace_period),
        ("LOCK_TIMEOUT", config.locks.timeout),
        ("GEOCODER_TIMEOUT", config.geocoder.timeout),
    ] {
        if value.is_zero() {
            return Err(ConfigGuardRailError::ZeroDuration { field });
        }
    }

    let presence = &config.presence;
    if presence.interval >= presence.ttl {
        return Err(ConfigGuardRailError::IntervalNotBelowTtl {
            interval: presence.interval,
            ttl: presence.ttl,
        });
    }
    if presence.interval > presence.ttl / 3 {
        warnings.push_with_hint(
            format!(
                "PRESENCE_INTERVAL {:?} is more than a third of PRESENCE_TTL {:?}; evictions may lag well past the TTL",
                presence.interval, presence.ttl
            ),
            "Keep the interval at or below TTL/3",
        );
    }

    if config.fanout.subscriber_buffer == 0 {
        return Err(ConfigGuardRailError::ZeroSubscriberBuffer);
    }

    if !config.dev_mode && config.cors.is_wildcard_included() {
        return Err(ConfigGuardRailError::DangerousCorsWildcard);
    }
    validate_cors(&config.cors)?;

    if config.geocoder.enabled {
        let url = config.geocoder.parsed_base_url().map_err(|err| {
            ConfigGuardRailError::InvalidGeocoderUrl {
                url: config.geocoder.base_url.clone(),
                reason: err.to_string(),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigGuardRailError::InvalidGeocoderUrl {
                url: config.geocoder.base_url.clone(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        if config.locks.timeout > config.geocoder.timeout {
            warnings.push(format!(
                "LOCK_TIMEOUT {:?} exceeds GEOCODER_TIMEOUT {:?}; busy convoys will stall requests longer than address lookups",
                config.locks.timeout, config.geocoder.timeout
            ));
        }
    } else {
        warnings.push_with_hint(
            "Address lookup disabled; free-text destinations will never resolve",
            "Set GEOCODER_ENABLED=true to resolve addresses through Nominatim",
        );
    }

    Ok(warnings)
}

fn validate_cors(cors: &CorsConfig) -> Result<(), ConfigGuardRailError> {
    for origin in &cors.allowed_origins {
        if origin.trim() == "*" {
            continue;
        }
        HeaderValue::from_str(origin.trim()).map_err(|_| {
            ConfigGuardRailError::InvalidCorsConfig {
                reason: format!("invalid origin `{origin}` in CORS_ALLOWED_ORIGINS"),
            }
        })?;
    }

    Ok(())
}
