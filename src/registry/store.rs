//! Session registry implementation
//!
//! Owns every live connection entry together with the producer directory.
//! Both live under one lock so a connection's leg state and its directory
//! record never disagree.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};

use super::directory::{ProducerDirectory, ProducerRecord};
use super::entry::{Connection, ConnectionId, Frame};
use super::error::RegistryError;

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    directory: ProducerDirectory,
}

/// Registry of signaling connections and the producers they own
///
/// Closures passed to [`read`](Self::read) and [`update`](Self::update) run
/// under the lock and must not block. Engine calls happen outside.
#[derive(Default)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection with both legs idle
    pub async fn open(&self, id: ConnectionId, outbound: mpsc::Sender<Frame>) {
        let mut state = self.state.write().await;
        let _ = state.connections.insert(id, Connection::new(id, outbound));

        tracing::debug!(
            connection_id = id,
            connections = state.connections.len(),
            "Connection registered"
        );
    }

    /// Remove a connection and release everything it owns
    ///
    /// Removes the connection's directory record, then closes its engine
    /// handles after the lock is dropped. Unknown ids are a no-op. Returns
    /// the removed directory record, if any.
    pub async fn close(&self, id: ConnectionId) -> Option<ProducerRecord> {
        let (connection, record) = {
            let mut state = self.state.write().await;
            let connection = state.connections.remove(&id)?;
            let record = state.directory.remove_by_connection(id);
            (connection, record)
        };

        tracing::info!(
            connection_id = id,
            producer = connection.producer.name(),
            consumer = connection.consumer.name(),
            duration_secs = connection.opened_at.elapsed().as_secs(),
            "Connection closed"
        );

        connection.close_handles();
        record
    }

    /// Inspect a connection
    pub async fn read<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&Connection, &ProducerDirectory) -> R,
    ) -> Result<R, RegistryError> {
        let state = self.state.read().await;
        let connection = state
            .connections
            .get(&id)
            .ok_or(RegistryError::ConnectionNotFound(id))?;
        Ok(f(connection, &state.directory))
    }

    /// Mutate a connection and the directory in one critical section
    pub async fn update<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut Connection, &mut ProducerDirectory) -> R,
    ) -> Result<R, RegistryError> {
        let mut state = self.state.write().await;
        let RegistryState {
            connections,
            directory,
        } = &mut *state;
        let connection = connections
            .get_mut(&id)
            .ok_or(RegistryError::ConnectionNotFound(id))?;
        Ok(f(connection, directory))
    }

    /// Queue a frame for one connection, waiting for room in its queue
    ///
    /// The registry lock is released before waiting. Returns `false` if the
    /// connection is gone.
    pub async fn send_to(&self, id: ConnectionId, frame: Frame) -> bool {
        let outbound = match self.state.read().await.connections.get(&id) {
            Some(connection) => connection.outbound(),
            None => return false,
        };
        outbound.send(frame).await.is_ok()
    }

    /// Queue a frame for every connection except the sender
    ///
    /// Delivery is best-effort: a full or closed queue is logged and skipped.
    /// Returns the number of connections the frame was queued for.
    pub async fn broadcast_except(&self, sender: ConnectionId, frame: Frame) -> usize {
        let state = self.state.read().await;
        let mut delivered = 0;

        for (id, connection) in state.connections.iter() {
            if *id == sender {
                continue;
            }
            if connection.send(frame.clone()) {
                delivered += 1;
            } else {
                tracing::warn!(connection_id = *id, "Failed to queue broadcast frame");
            }
        }

        delivered
    }

    /// Snapshot of the producer directory in insertion order
    pub async fn producers(&self) -> Vec<ProducerRecord> {
        self.state.read().await.directory.iter().cloned().collect()
    }

    /// Number of open connections
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Number of active producers
    pub async fn producer_count(&self) -> usize {
        self.state.read().await.directory.len()
    }
}
