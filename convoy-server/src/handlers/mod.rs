pub mod convoy;
pub mod handle_websocket;
