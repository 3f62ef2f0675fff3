use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    handlers::{
        convoy::{
            get_convoy_handler, join_convoy_handler, leave_convoy_handler,
            set_destination_handler, update_position_handler,
        },
        handle_websocket::convoy_websocket_handler,
    },
};

/// Route paths, relative to `/api/v1`
pub mod paths {
    pub const JOIN: &str = "/convoys/join";
    pub const LEAVE: &str = "/convoys/leave";
    pub const POSITION: &str = "/convoys/position";
    pub const DESTINATION: &str = "/convoys/destination";
    pub const CONVOY: &str = "/convoys/{convoyId}";
    pub const SOCKET: &str = "/convoys/{convoyId}/ws";
}

/// Create all v1 API routes
pub fn create_v1_router(_state: AppState) -> Router<AppState> {
    Router::new()
        .route(paths::JOIN, post(join_convoy_handler))
        .route(paths::LEAVE, post(leave_convoy_handler))
        .route(paths::POSITION, post(update_position_handler))
        .route(paths::DESTINATION, post(set_destination_handler))
        .route(paths::CONVOY, get(get_convoy_handler))
        .route(paths::SOCKET, get(convoy_websocket_handler))
}
