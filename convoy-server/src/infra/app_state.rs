use std::{fmt, sync::Arc};

use tokio_util::sync::CancellationToken;

use convoy_config::Config;
use convoy_core::{AddressLookup, ConvoyService};

use crate::infra::websocket::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConvoyService>,
    pub config: Arc<Config>,
    pub websocket_manager: Arc<ConnectionManager>,
    /// Cancelled on shutdown; background tasks and sockets watch it
    pub shutdown: CancellationToken,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("service", &self.service)
            .field("websocket_manager", &self.websocket_manager)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(config: Arc<Config>, lookup: Arc<dyn AddressLookup>) -> Self {
        let service = Arc::new(ConvoyService::new(config.service_settings(), lookup));

        Self {
            service,
            config,
            websocket_manager: Arc::new(ConnectionManager::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
