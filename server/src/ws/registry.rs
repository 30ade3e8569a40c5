//! Online-user registry: one live gateway connection per user.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::ws::codec::GatewayProtocol;
use crate::ws::ConnectionSender;

/// Out-of-band instructions for a connection's actor.
#[derive(Debug, Clone)]
pub enum ConnectionControl {
    /// Close the socket with `code` and end the session.
    ForceClose { code: u16, reason: String },
}

pub type ControlSender = mpsc::UnboundedSender<ConnectionControl>;

#[derive(Debug, Clone)]
pub struct ConnectedClient {
    /// Distinguishes this socket from a later one for the same user.
    pub connection_id: Uuid,
    pub sender: ConnectionSender,
    pub control: ControlSender,
    pub protocol: GatewayProtocol,
    pub developer: bool,
    pub connected_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    clients: Arc<DashMap<String, ConnectedClient>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` for `user_id`. Check and insert happen under the
    /// shard lock, so two concurrent handshakes cannot both succeed.
    pub fn register(&self, user_id: &str, client: ConnectedClient) -> Result<(), GatewayError> {
        match self.clients.entry(user_id.to_string()) {
            Entry::Occupied(_) => Err(GatewayError::DuplicateConnection),
            Entry::Vacant(slot) => {
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = %client.connection_id,
                    protocol = client.protocol.as_str(),
                    "Connection registered"
                );
                slot.insert(client);
                Ok(())
            }
        }
    }

    /// Remove the entry only if it still belongs to `connection_id`.
    pub fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        let removed = self
            .clients
            .remove_if(user_id, |_, client| client.connection_id == connection_id)
            .is_some();
        if removed {
            tracing::debug!(user_id = %user_id, connection_id = %connection_id, "Connection unregistered");
        }
        removed
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectedClient> {
        self.clients.get(user_id).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every registered connection.
    pub fn list_all(&self) -> Vec<(String, ConnectedClient)> {
        self.clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
