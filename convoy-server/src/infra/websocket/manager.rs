use crate::infra::websocket::connection::Connection;
use convoy_core::ConvoyId;
use dashmap::DashMap;
use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Registry of open convoy sockets, grouped by convoy
#[derive(Clone)]
pub struct ConnectionManager {
    /// Active WebSocket connections mapped by connection ID
    connections: Arc<DashMap<Uuid, Arc<Connection>>>,
    /// Convoy rooms - maps convoy id to list of connection IDs
    rooms: Arc<DashMap<ConvoyId, Vec<Uuid>>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connections.len())
            .field("room_count", &self.rooms.len())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
        }
    }

    /// Register a new connection and place it in its convoy room
    pub fn add_connection(&self, connection: Arc<Connection>) {
        self.rooms
            .entry(connection.convoy_id.clone())
            .or_default()
            .push(connection.id);
        self.connections.insert(connection.id, connection);
    }

    /// Remove a connection and clean up room membership
    pub fn remove_connection(&self, conn_id: Uuid) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(&conn_id)?;

        if let Some(mut room) = self.rooms.get_mut(&connection.convoy_id) {
            room.value_mut().retain(|id| id != &conn_id);
        }

        // Clean up empty room
        self.rooms
            .remove_if(&connection.convoy_id, |_, ids| ids.is_empty());

        Some(connection)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Open sockets watching one convoy
    pub fn room_size(&self, convoy_id: &ConvoyId) -> usize {
        self.rooms.get(convoy_id).map(|room| room.len()).unwrap_or(0)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
