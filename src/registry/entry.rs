//! Connection entry and leg state types
//!
//! Each signaling connection negotiates at most one outgoing (producer) leg
//! and one incoming (consumer) leg. Both are explicit state machines:
//!
//! ```text
//! producer leg:  Idle ──► TransportReady ──► Producing
//!                              ▲                 │
//!                              └──closeProducer──┘
//!
//! consumer leg:  Idle ──► TransportReady ──► Consuming
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::engine::{Consumer, EngineResult, Producer, WebRtcTransport};

/// Process-unique connection identifier
pub type ConnectionId = u64;

/// Serialized outbound message
pub type Frame = Arc<str>;

/// State of a connection's outgoing media leg
#[derive(Default)]
pub enum ProducerLeg {
    /// No transport yet
    #[default]
    Idle,
    /// Transport allocated, nothing produced yet
    TransportReady {
        /// Producer transport
        transport: Arc<dyn WebRtcTransport>,
    },
    /// Peer is sending media
    Producing {
        /// Producer transport
        transport: Arc<dyn WebRtcTransport>,
        /// Active producer
        producer: Arc<dyn Producer>,
    },
}

impl ProducerLeg {
    /// The producer transport, if allocated
    pub fn transport(&self) -> Option<&Arc<dyn WebRtcTransport>> {
        match self {
            ProducerLeg::Idle => None,
            ProducerLeg::TransportReady { transport } | ProducerLeg::Producing { transport, .. } => {
                Some(transport)
            }
        }
    }

    /// The active producer, if any
    pub fn producer(&self) -> Option<&Arc<dyn Producer>> {
        match self {
            ProducerLeg::Producing { producer, .. } => Some(producer),
            _ => None,
        }
    }

    /// Check if the leg is producing
    pub fn is_producing(&self) -> bool {
        matches!(self, ProducerLeg::Producing { .. })
    }

    /// State name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ProducerLeg::Idle => "idle",
            ProducerLeg::TransportReady { .. } => "transport-ready",
            ProducerLeg::Producing { .. } => "producing",
        }
    }

    /// Install a transport
    ///
    /// Replaces a transport that has not produced yet and returns it so the
    /// caller can close it. While producing, the new transport is handed back
    /// as the error.
    pub fn set_transport(
        &mut self,
        transport: Arc<dyn WebRtcTransport>,
    ) -> Result<Option<Arc<dyn WebRtcTransport>>, Arc<dyn WebRtcTransport>> {
        match std::mem::take(self) {
            ProducerLeg::Idle => {
                *self = ProducerLeg::TransportReady { transport };
                Ok(None)
            }
            ProducerLeg::TransportReady { transport: previous } => {
                *self = ProducerLeg::TransportReady { transport };
                Ok(Some(previous))
            }
            producing @ ProducerLeg::Producing { .. } => {
                *self = producing;
                Err(transport)
            }
        }
    }

    /// Transition `TransportReady -> Producing`
    ///
    /// Any other state hands the producer back as the error.
    pub fn start_producing(&mut self, producer: Arc<dyn Producer>) -> Result<(), Arc<dyn Producer>> {
        match std::mem::take(self) {
            ProducerLeg::TransportReady { transport } => {
                *self = ProducerLeg::Producing {
                    transport,
                    producer,
                };
                Ok(())
            }
            other => {
                *self = other;
                Err(producer)
            }
        }
    }

    /// Transition `Producing -> TransportReady`, returning the producer
    pub fn stop_producing(&mut self) -> Option<Arc<dyn Producer>> {
        match std::mem::take(self) {
            ProducerLeg::Producing {
                transport,
                producer,
            } => {
                *self = ProducerLeg::TransportReady { transport };
                Some(producer)
            }
            other => {
                *self = other;
                None
            }
        }
    }

    /// Close every handle the leg owns, best-effort
    pub fn close(self, connection_id: ConnectionId) {
        match self {
            ProducerLeg::Idle => {}
            ProducerLeg::TransportReady { transport } => {
                log_close_failure(connection_id, "producer transport", transport.close());
            }
            ProducerLeg::Producing {
                transport,
                producer,
            } => {
                log_close_failure(connection_id, "producer", producer.close());
                log_close_failure(connection_id, "producer transport", transport.close());
            }
        }
    }
}

/// State of a connection's incoming media leg
#[derive(Default)]
pub enum ConsumerLeg {
    /// No transport yet
    #[default]
    Idle,
    /// Transport allocated, nothing consumed yet
    TransportReady {
        /// Consumer transport
        transport: Arc<dyn WebRtcTransport>,
    },
    /// Peer is receiving a producer
    Consuming {
        /// Consumer transport
        transport: Arc<dyn WebRtcTransport>,
        /// Active consumer
        consumer: Arc<dyn Consumer>,
    },
}

impl ConsumerLeg {
    /// The consumer transport, if allocated
    pub fn transport(&self) -> Option<&Arc<dyn WebRtcTransport>> {
        match self {
            ConsumerLeg::Idle => None,
            ConsumerLeg::TransportReady { transport } | ConsumerLeg::Consuming { transport, .. } => {
                Some(transport)
            }
        }
    }

    /// The active consumer, if any
    pub fn consumer(&self) -> Option<&Arc<dyn Consumer>> {
        match self {
            ConsumerLeg::Consuming { consumer, .. } => Some(consumer),
            _ => None,
        }
    }

    /// State name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ConsumerLeg::Idle => "idle",
            ConsumerLeg::TransportReady { .. } => "transport-ready",
            ConsumerLeg::Consuming { .. } => "consuming",
        }
    }

    /// Install a fresh transport, returning the previous leg for closing
    pub fn replace_transport(&mut self, transport: Arc<dyn WebRtcTransport>) -> ConsumerLeg {
        std::mem::replace(self, ConsumerLeg::TransportReady { transport })
    }

    /// Transition to `Consuming`
    ///
    /// Returns the consumer this one replaces, if any. Without a transport the
    /// new consumer is handed back as the error.
    pub fn start_consuming(
        &mut self,
        consumer: Arc<dyn Consumer>,
    ) -> Result<Option<Arc<dyn Consumer>>, Arc<dyn Consumer>> {
        match std::mem::take(self) {
            ConsumerLeg::Idle => Err(consumer),
            ConsumerLeg::TransportReady { transport } => {
                *self = ConsumerLeg::Consuming {
                    transport,
                    consumer,
                };
                Ok(None)
            }
            ConsumerLeg::Consuming {
                transport,
                consumer: previous,
            } => {
                *self = ConsumerLeg::Consuming {
                    transport,
                    consumer,
                };
                Ok(Some(previous))
            }
        }
    }

    /// Close every handle the leg owns, best-effort
    pub fn close(self, connection_id: ConnectionId) {
        match self {
            ConsumerLeg::Idle => {}
            ConsumerLeg::TransportReady { transport } => {
                log_close_failure(connection_id, "consumer transport", transport.close());
            }
            ConsumerLeg::Consuming {
                transport,
                consumer,
            } => {
                log_close_failure(connection_id, "consumer", consumer.close());
                log_close_failure(connection_id, "consumer transport", transport.close());
            }
        }
    }
}

/// Log a failed close without propagating it
pub(crate) fn log_close_failure(connection_id: ConnectionId, what: &str, result: EngineResult<()>) {
    if let Err(e) = result {
        tracing::debug!(
            connection_id = connection_id,
            handle = what,
            error = %e,
            "Close failed"
        );
    }
}

/// Entry for a single signaling connection
pub struct Connection {
    /// Connection id
    pub id: ConnectionId,

    /// Outgoing leg
    pub producer: ProducerLeg,

    /// Incoming leg
    pub consumer: ConsumerLeg,

    /// When the connection was opened
    pub opened_at: Instant,

    /// Sender to the connection's write task
    outbound: mpsc::Sender<Frame>,
}

impl Connection {
    /// Create a new entry with both legs idle
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            producer: ProducerLeg::Idle,
            consumer: ConsumerLeg::Idle,
            opened_at: Instant::now(),
            outbound,
        }
    }

    /// Queue a frame for the peer without waiting
    ///
    /// Returns `false` if the queue is full or the peer is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    /// Handle to the outbound queue
    pub fn outbound(&self) -> mpsc::Sender<Frame> {
        self.outbound.clone()
    }

    /// Close all owned handles, best-effort
    pub fn close_handles(self) {
        let id = self.id;
        self.consumer.close(id);
        self.producer.close(id);
    }
}
