use std::{fs, path::Path, sync::Mutex, time::Duration};

use convoy_config::{ConfigGuardRailError, ConfigLoadError, ConfigLoader};
use once_cell::sync::Lazy;
use tempfile::tempdir;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const MANAGED_VARS: [&str; 14] = [
    "SERVER_HOST",
    "SERVER_PORT",
    "PRESENCE_INTERVAL",
    "PRESENCE_TTL",
    "PRESENCE_GRACE_PERIOD",
    "FANOUT_SUBSCRIBER_BUFFER",
    "LOCK_TIMEOUT",
    "GEOCODER_ENABLED",
    "GEOCODER_BASE_URL",
    "GEOCODER_USER_AGENT",
    "GEOCODER_TIMEOUT",
    "CORS_ALLOWED_ORIGINS",
    "DEV_MODE",
    "CONVOY_CONFIG_PATH",
];

fn env_guard() -> std::sync::MutexGuard<'static, ()> {
    let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    for key in MANAGED_VARS {
        // SAFETY: serialized by ENV_LOCK
        unsafe { std::env::remove_var(key) };
    }
    guard
}

fn set_env(key: &str, value: &str) {
    // SAFETY: serialized by ENV_LOCK
    unsafe { std::env::set_var(key, value) };
}

fn loader_in(dir: &Path) -> ConfigLoader {
    // Point at a missing .env so a developer's local file never leaks in
    ConfigLoader::new().with_env_file(dir.join("missing.env"))
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = env_guard();
    let dir = tempdir().unwrap();

    let load = loader_in(dir.path()).load().unwrap();

    assert_eq!(load.config.server.port, 8080);
    assert_eq!(load.config.presence.interval, Duration::from_secs(10));
    assert_eq!(load.config.presence.ttl, Duration::from_secs(30));
    assert_eq!(load.config.fanout.subscriber_buffer, 256);
    assert!(load.config.geocoder.enabled);
    assert!(load.config.metadata.config_path.is_none());
    assert!(!load.config.metadata.env_file_loaded);
    assert!(
        load.warnings
            .iter()
            .any(|w| w.message.contains("No convoy.toml"))
    );
}

#[test]
fn file_values_are_read_and_env_wins() {
    let _guard = env_guard();
    let dir = tempdir().unwrap();
    let path = dir.path().join("convoy.toml");
    fs::write(
        &path,
        r#"
dev_mode = true

[server]
host = "127.0.0.1"
port = 9000

[presence]
interval = "5s"
ttl = "1m"
grace_period = "45s"

[fanout]
subscriber_buffer = 16

[geocoder]
enabled = false
"#,
    )
    .unwrap();
    set_env("SERVER_PORT", "9100");
    set_env("PRESENCE_TTL", "40s");

    let load = loader_in(dir.path())
        .with_config_path(&path)
        .load()
        .unwrap();
    let config = load.config;

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.presence.interval, Duration::from_secs(5));
    assert_eq!(config.presence.ttl, Duration::from_secs(40));
    assert_eq!(config.presence.grace_period, Duration::from_secs(45));
    assert_eq!(config.fanout.subscriber_buffer, 16);
    assert!(!config.geocoder.enabled);
    assert!(config.dev_mode);
    assert_eq!(config.metadata.config_path.as_deref(), Some(path.as_path()));

    let settings = config.presence_settings();
    assert_eq!(settings.ttl, Duration::from_secs(40));
}

#[test]
fn env_file_is_loaded() {
    let _guard = env_guard();
    let dir = tempdir().unwrap();
    let env_file = dir.path().join(".env");
    fs::write(&env_file, "FANOUT_SUBSCRIBER_BUFFER=32\nCORS_ALLOWED_ORIGINS=https://a.example, https://b.example\n").unwrap();

    let load = ConfigLoader::new().with_env_file(&env_file).load().unwrap();

    assert!(load.config.metadata.env_file_loaded);
    assert_eq!(load.config.fanout.subscriber_buffer, 32);
    assert_eq!(
        load.config.cors.allowed_origins,
        vec!["https://a.example", "https://b.example"]
    );
}

#[test]
fn explicit_missing_file_is_an_error() {
    let _guard = env_guard();
    let dir = tempdir().unwrap();

    let err = loader_in(dir.path())
        .with_config_path(dir.path().join("nope.toml"))
        .load()
        .unwrap_err();

    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn env_config_path_must_exist() {
    let _guard = env_guard();
    let dir = tempdir().unwrap();
    set_env(
        "CONVOY_CONFIG_PATH",
        dir.path().join("absent.toml").to_str().unwrap(),
    );

    let err = loader_in(dir.path()).load().unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn malformed_duration_names_the_field() {
    let _guard = env_guard();
    let dir = tempdir().unwrap();
    set_env("LOCK_TIMEOUT", "whenever");

    let err = loader_in(dir.path()).load().unwrap_err();
    match err {
        ConfigLoadError::InvalidDuration { field, value, .. } => {
            assert_eq!(field, "LOCK_TIMEOUT");
            assert_eq!(value, "whenever");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unknown_file_keys_are_rejected() {
    let _guard = env_guard();
    let dir = tempdir().unwrap();
    let path = dir.path().join("convoy.toml");
    fs::write(&path, "presence_ttl = \"30s\"\n").unwrap();

    let err = loader_in(dir.path())
        .with_config_path(&path)
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn guard_rails_run_after_composition() {
    let _guard = env_guard();
    let dir = tempdir().unwrap();
    set_env("PRESENCE_INTERVAL", "30s");

    let err = loader_in(dir.path()).load().unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::IntervalNotBelowTtl { .. })
    ));
}

#[test]
fn wildcard_cors_is_rejected_outside_dev_mode() {
    let _guard = env_guard();
    let dir = tempdir().unwrap();
    set_env("CORS_ALLOWED_ORIGINS", "*");

    let err = loader_in(dir.path()).load().unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::DangerousCorsWildcard)
    ));

    set_env("DEV_MODE", "true");
    assert!(loader_in(dir.path()).load().is_ok());
}
