pub mod error;

use once_cell::sync::Lazy;
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

use crate::constants::DEFAULT_CONFIG_FILES;
use crate::models::{
    Config, ConfigMetadata, CorsConfig, FanoutConfig, GeocoderConfig, LockConfig, PresenceConfig,
    ServerConfig,
    sources::{EnvConfig, FileConfig},
};
use crate::util::parse_duration;
use crate::validation::{self, ConfigWarnings};

pub use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> =
    Lazy::new(|| DEFAULT_CONFIG_FILES.iter().map(PathBuf::from).collect());

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Builds a [`Config`] from, in order of precedence: environment variables,
/// the TOML file, then built-in defaults.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path)
                .map(|_| true)
                .or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let env_config = EnvConfig::gather();
        let (file_config, config_path) = self.load_file_config(&env_config)?;

        self.compose_config(file_config, env_config, config_path, env_file_loaded)
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // Explicit and env paths must exist; defaults are only probed
        let (path, required) = match (&self.options.config_path, &env_config.config_path) {
            (Some(explicit), _) => (explicit.clone(), true),
            (None, Some(from_env)) => (from_env.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => (found.clone(), false),
                None => return Ok((None, None)),
            },
        };

        if !path.exists() {
            if required {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "loaded configuration file");
        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No convoy.toml detected; using environment variables and defaults",
                "Pass --config or set CONVOY_CONFIG_PATH to use a configuration file",
            );
        }

        let FileConfig {
            server: file_server,
            presence: file_presence,
            fanout: file_fanout,
            locks: file_locks,
            geocoder: file_geocoder,
            cors: file_cors,
            dev_mode: file_dev_mode,
        } = file_config.unwrap_or_default();

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env
                .server_host
                .or(file_server.host)
                .unwrap_or(server_defaults.host),
            port: env.server_port.or(file_server.port).unwrap_or(server_defaults.port),
        };

        let presence_defaults = PresenceConfig::default();
        let presence = PresenceConfig {
            interval: pick_duration(
                "PRESENCE_INTERVAL",
                env.presence_interval,
                file_presence.interval,
                presence_defaults.interval,
            )?,
            ttl: pick_duration(
                "PRESENCE_TTL",
                env.presence_ttl,
                file_presence.ttl,
                presence_defaults.ttl,
            )?,
            grace_period: pick_duration(
                "PRESENCE_GRACE_PERIOD",
                env.presence_grace_period,
                file_presence.grace_period,
                presence_defaults.grace_period,
            )?,
        };

        let fanout = FanoutConfig {
            subscriber_buffer: env
                .subscriber_buffer
                .or(file_fanout.subscriber_buffer)
                .unwrap_or(FanoutConfig::default().subscriber_buffer),
        };

        let locks = LockConfig {
            timeout: pick_duration(
                "LOCK_TIMEOUT",
                env.lock_timeout,
                file_locks.timeout,
                LockConfig::default().timeout,
            )?,
        };

        let geocoder_defaults = GeocoderConfig::default();
        let geocoder = GeocoderConfig {
            enabled: env
                .geocoder_enabled
                .or(file_geocoder.enabled)
                .unwrap_or(geocoder_defaults.enabled),
            base_url: env
                .geocoder_base_url
                .or(file_geocoder.base_url)
                .unwrap_or(geocoder_defaults.base_url),
            user_agent: env
                .geocoder_user_agent
                .or(file_geocoder.user_agent)
                .unwrap_or(geocoder_defaults.user_agent),
            timeout: pick_duration(
                "GEOCODER_TIMEOUT",
                env.geocoder_timeout,
                file_geocoder.timeout,
                geocoder_defaults.timeout,
            )?,
        };

        let cors = CorsConfig {
            allowed_origins: env
                .cors_allowed_origins
                .or(file_cors.allowed_origins)
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let dev_mode = env.dev_mode.or(file_dev_mode).unwrap_or(false);

        let config = Config {
            server,
            presence,
            fanout,
            locks,
            geocoder,
            cors,
            dev_mode,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok(ConfigLoad { config, warnings })
    }
}

fn pick_duration(
    field: &'static str,
    env: Option<String>,
    file: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match env.or(file) {
        Some(raw) => parse_duration(&raw).map_err(|source| ConfigLoadError::InvalidDuration {
            field,
            value: raw,
            source,
        }),
        None => Ok(default),
    }
}
