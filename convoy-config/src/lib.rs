//! Configuration library for the convoy service.
//!
//! Configuration is layered: environment variables (optionally seeded from a
//! `.env` file) override values from `convoy.toml`, which override built-in
//! defaults. Loading finishes with guard rails that reject settings the
//! presence and fan-out machinery cannot work with, and collect warnings for
//! settings that merely look suspicious.

pub mod constants;
pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{
    Config, ConfigMetadata, CorsConfig, FanoutConfig, GeocoderConfig, LockConfig, PresenceConfig,
    ServerConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
