use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, header},
    response::Json,
    routing::get,
};
use serde_json::{Value, json};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;

use crate::{AppState, routes};

pub fn create_app(state: AppState) -> Router {
    // Create versioned API routes
    let versioned_api = routes::create_api_router(state.clone());

    // Build CORS layer (permissive in dev, allow-list otherwise)
    let cors_layer = if state.config().dev_mode {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config()
            .cors
            .allowed_origins
            .iter()
            .map(|s| s.trim())
            .filter(|s| *s != "*")
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    };

    Router::new()
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .merge(versioned_api)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping_handler() -> Json<Value> {
    debug!("Ping endpoint called");
    Json(json!({
        "status": "ok",
        "message": "Convoy server is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let stats = state.service.stats();

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "convoys": stats,
        "sockets": {
            "connections": state.websocket_manager.connection_count(),
            "convoys": state.websocket_manager.room_count(),
        },
        "geocoder": {
            "enabled": state.config().geocoder.enabled,
        },
    }))
}
