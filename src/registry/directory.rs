//! Producer directory
//!
//! Ordered list of active producers across all connections. Consumer
//! selection walks it front to back, so the oldest producer not owned by the
//! caller wins.

use crate::engine::MediaKind;

use super::entry::ConnectionId;
use super::error::RegistryError;

/// A producer as seen by other connections
///
/// Does not own the engine handle; the owning connection's producer leg does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    /// Connection that owns the producer
    pub connection_id: ConnectionId,
    /// Engine producer id
    pub producer_id: String,
    /// Media kind
    pub kind: MediaKind,
}

/// Insertion-ordered producer directory
#[derive(Debug, Default)]
pub struct ProducerDirectory {
    records: Vec<ProducerRecord>,
}

impl ProducerDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record
    ///
    /// Returns the directory size after the append. A connection can own at
    /// most one record.
    pub fn append(&mut self, record: ProducerRecord) -> Result<usize, RegistryError> {
        if self.contains(record.connection_id) {
            return Err(RegistryError::AlreadyProducing(record.connection_id));
        }
        self.records.push(record);
        Ok(self.records.len())
    }

    /// Remove the record owned by a connection
    pub fn remove_by_connection(&mut self, connection_id: ConnectionId) -> Option<ProducerRecord> {
        let idx = self
            .records
            .iter()
            .position(|r| r.connection_id == connection_id)?;
        Some(self.records.remove(idx))
    }

    /// First record whose owner is not the given connection
    pub fn find_first_not_owned_by(&self, connection_id: ConnectionId) -> Option<&ProducerRecord> {
        self.records.iter().find(|r| r.connection_id != connection_id)
    }

    /// Whether a connection owns a record
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.records.iter().any(|r| r.connection_id == connection_id)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the directory is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ProducerRecord> {
        self.records.iter()
    }
}
