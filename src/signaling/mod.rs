//! WebSocket signaling
//!
//! Each text frame carries one JSON request `{"type": ..., ...}`. The broker
//! validates it against the connection's state, drives the media engine and
//! answers with `{"type": ..., "data": ...}` on the same connection. Replies
//! go out in request order; `newProducer` notifications go to every other
//! connection.

pub mod broker;
pub mod error;
pub mod message;

pub use broker::Broker;
pub use error::SignalingError;
pub use message::{ClientMessage, Parsed, Reply};
