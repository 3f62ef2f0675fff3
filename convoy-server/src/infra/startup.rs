use anyhow::Result;
use async_trait::async_trait;

use crate::infra::app_state::AppState;

#[async_trait]
pub trait StartupHooks: Send + Sync {
    async fn run(&self, state: &AppState) -> Result<()>;
}

/// Starts the presence monitor; it stops when `state.shutdown` is cancelled
#[derive(Debug, Default)]
pub struct ProdStartupHooks;

#[async_trait]
impl StartupHooks for ProdStartupHooks {
    async fn run(&self, state: &AppState) -> Result<()> {
        let monitor = state
            .service
            .presence_monitor(state.config().presence_settings());
        monitor.spawn(state.shutdown.child_token());

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopStartupHooks;

#[async_trait]
impl StartupHooks for NoopStartupHooks {
    async fn run(&self, _state: &AppState) -> Result<()> {
        Ok(())
    }
}
