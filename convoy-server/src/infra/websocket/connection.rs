use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use convoy_core::{ConvoyId, SubscriptionId, UserId};

use super::messages::ServerFrame;

#[derive(Clone)]
pub struct Connection {
    /// Unique connection ID
    pub id: Uuid,
    pub convoy_id: ConvoyId,
    /// Member the socket belongs to; `None` for observers
    pub user_id: Option<UserId>,
    /// Fan-out subscription feeding this socket
    pub subscription_id: SubscriptionId,
    /// Channel to send frames to this connection
    sender: mpsc::Sender<ServerFrame>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("convoy_id", &self.convoy_id)
            .field("user_id", &self.user_id)
            .field("subscription_id", &self.subscription_id)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl Connection {
    pub fn new(
        convoy_id: ConvoyId,
        user_id: Option<UserId>,
        subscription_id: SubscriptionId,
        sender: mpsc::Sender<ServerFrame>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            convoy_id,
            user_id,
            subscription_id,
            sender,
        }
    }

    /// Queue a frame for this connection; false once the writer is gone
    pub async fn send_frame(&self, frame: ServerFrame) -> bool {
        self.sender.send(frame).await.is_ok()
    }
}
