//! Connection registry and producer directory
//!
//! Tracks every open signaling connection, the media legs it has negotiated,
//! and which producers exist for others to consume.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<SessionRegistry>
//!                 ┌──────────────────────────────┐
//!                 │ connections: HashMap<Id,     │
//!                 │   Connection {               │
//!                 │     producer: ProducerLeg,   │
//!                 │     consumer: ConsumerLeg,   │
//!                 │     outbound: mpsc::Tx,      │
//!                 │   }>                         │
//!                 │ directory: [ProducerRecord]  │
//!                 └──────────────┬───────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        ▼                       ▼                       ▼
//!   [Connection 1]          [Connection 2]          [Connection 3]
//!   produce ──► directory.append ──► broadcast_except(1) ──► newProducer
//! ```
//!
//! Engine handles are owned by the connection's legs. Directory records only
//! name producers; removing a record never closes anything by itself.

pub mod directory;
pub mod entry;
pub mod error;
pub mod store;

pub use directory::{ProducerDirectory, ProducerRecord};
pub use entry::{Connection, ConnectionId, ConsumerLeg, Frame, ProducerLeg};
pub use error::RegistryError;
pub use store::SessionRegistry;
