//! # Convoy Server
//!
//! HTTP and WebSocket surface of the convoy presence service.
//!
//! - `POST /api/v1/convoys/{join,leave,position,destination}` mutate a convoy
//! - `GET /api/v1/convoys/{convoyId}` returns its snapshot
//! - `GET /api/v1/convoys/{convoyId}/ws` streams its events
//! - `GET /ping` and `GET /health` for liveness and statistics

pub mod app;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use app::create_app;
pub use infra::app_state::AppState;
