use std::{net::SocketAddr, sync::Arc};

use anyhow::{Result, anyhow};
use axum_test::TestServer;

use convoy_config::Config;
use convoy_core::{AddressLookup, Coordinate, StaticLookup};
use convoy_server::{AppState, create_app, infra::startup::StartupHooks};

// Code is used by test modules, but not in this scope
#[allow(unused)]
pub fn eiffel_tower() -> Coordinate {
    Coordinate::new(48.8584, 2.2945).expect("valid coordinate")
}

#[allow(unused)]
pub fn test_lookup() -> Arc<dyn AddressLookup> {
    Arc::new(StaticLookup::new().with("Eiffel Tower", eiffel_tower()))
}

#[allow(unused)]
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.geocoder.enabled = false;
    config
}

#[allow(unused)]
pub async fn build_test_state_with_hooks<H: StartupHooks>(hooks: &H) -> Result<AppState> {
    let state = AppState::new(Arc::new(test_config()), test_lookup());
    hooks.run(&state).await?;
    Ok(state)
}

#[allow(unused)]
pub fn test_server(state: AppState) -> Result<TestServer> {
    let make_service = create_app(state).into_make_service_with_connect_info::<SocketAddr>();
    TestServer::builder()
        .http_transport()
        .build(make_service)
        .map_err(|err| anyhow!(err.to_string()))
}
