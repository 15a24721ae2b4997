//! Registry error types

use super::entry::ConnectionId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Connection is not registered (never opened or already closed)
    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),
    /// Connection already owns a producer
    #[error("connection {0} is already producing")]
    AlreadyProducing(ConnectionId),
}
