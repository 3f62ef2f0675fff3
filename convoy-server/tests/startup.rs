use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use convoy_core::{ConvoyError, ConvoyId, UserId};
use convoy_server::{
    AppState,
    infra::startup::{NoopStartupHooks, ProdStartupHooks, StartupHooks},
};
use serde_json::Value;

mod common;
use common::{build_test_state_with_hooks, test_server};

struct RecordingHooks {
    called: Arc<AtomicBool>,
}

#[async_trait]
impl StartupHooks for RecordingHooks {
    async fn run(&self, _state: &AppState) -> Result<()> {
        self.called.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn build_test_state_invokes_custom_startup_hooks() -> Result<()> {
    let flag = Arc::new(AtomicBool::new(false));
    let hooks = RecordingHooks {
        called: Arc::clone(&flag),
    };

    let state = build_test_state_with_hooks(&hooks).await?;
    let server = test_server(state)?;

    // A minimal smoke-check that the router is fully wired and ready to serve requests.
    let response = server.get("/ping").await;
    response.assert_status_ok();

    assert!(flag.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn health_reports_convoy_statistics() -> Result<()> {
    let state = build_test_state_with_hooks(&NoopStartupHooks).await?;
    let convoy = ConvoyId::parse("roadtrip")?;
    state
        .service
        .join(&convoy, &UserId::parse("u1")?, "Alice")
        .await?;
    let server = test_server(state)?;

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["convoys"]["convoys"], 1);
    assert_eq!(body["convoys"]["subscribers"], 0);
    assert_eq!(body["sockets"]["connections"], 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn prod_hooks_start_the_presence_monitor() -> Result<()> {
    let state = build_test_state_with_hooks(&ProdStartupHooks).await?;
    let convoy = ConvoyId::parse("roadtrip")?;
    let user = UserId::parse("u1")?;

    // Joins but never reports a position
    state.service.join(&convoy, &user, "Alice").await?;

    tokio::time::sleep(Duration::from_secs(45)).await;

    assert_eq!(
        state.service.snapshot(&convoy),
        Err(ConvoyError::UnknownConvoy(convoy.clone()))
    );

    state.shutdown.cancel();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_shutdown_stops_eviction() -> Result<()> {
    let state = build_test_state_with_hooks(&ProdStartupHooks).await?;
    state.shutdown.cancel();

    let convoy = ConvoyId::parse("roadtrip")?;
    state
        .service
        .join(&convoy, &UserId::parse("u1")?, "Alice")
        .await?;

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(state.service.snapshot(&convoy).is_ok());
    Ok(())
}

#[tokio::test]
async fn state_is_built_from_a_loaded_config_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("convoy.toml");
    std::fs::write(
        &path,
        r#"
dev_mode = true

[fanout]
subscriber_buffer = 8

[locks]
timeout = "500ms"

[geocoder]
enabled = false
"#,
    )?;

    let load = convoy_config::ConfigLoader::new()
        .with_config_path(&path)
        .with_env_file(dir.path().join("missing.env"))
        .load()?;
    let state = AppState::new(Arc::new(load.config), common::test_lookup());

    let settings = state.service.settings();
    assert_eq!(settings.subscriber_buffer, 8);
    assert_eq!(settings.lock_timeout, Duration::from_millis(500));

    let server = test_server(state)?;
    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["geocoder"]["enabled"], false);
    Ok(())
}
