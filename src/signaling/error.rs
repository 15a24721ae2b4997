//! Signaling error types

use crate::engine::EngineError;
use crate::registry::RegistryError;

/// Error returned by a signaling handler
///
/// The display text is what the requesting peer receives in an `error`
/// response. None of these close the connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignalingError {
    /// Connection is not (or no longer) registered
    #[error("connection not registered")]
    UnknownConnection,

    /// Producer leg has no transport
    #[error("producer transport not created")]
    ProducerTransportMissing,

    /// Producer transport was replaced while a request was in flight
    #[error("producer transport replaced")]
    ProducerTransportReplaced,

    /// Connection already owns a producer
    #[error("already producing")]
    AlreadyProducing,

    /// Connection owns no producer
    #[error("not producing")]
    NotProducing,

    /// Consumer leg has no transport
    #[error("consumer transport not created")]
    ConsumerTransportMissing,

    /// Consumer transport was replaced while a request was in flight
    #[error("consumer transport replaced")]
    ConsumerTransportReplaced,

    /// No producer owned by another connection exists
    #[error("No other producers available")]
    NoEligibleProducer,

    /// Engine reports the capabilities cannot receive the producer
    #[error("Cannot consume selected producer")]
    CannotConsume,

    /// Engine failed to create the consumer
    #[error("Failed to create consumer")]
    ConsumeFailed(#[source] EngineError),

    /// Connection has no consumer to resume
    #[error("consumer not created")]
    NoConsumer,

    /// Any other engine failure
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<RegistryError> for SignalingError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ConnectionNotFound(_) => SignalingError::UnknownConnection,
            RegistryError::AlreadyProducing(_) => SignalingError::AlreadyProducing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_facing_messages() {
        assert_eq!(
            SignalingError::NoEligibleProducer.to_string(),
            "No other producers available"
        );
        assert_eq!(
            SignalingError::CannotConsume.to_string(),
            "Cannot consume selected producer"
        );
        assert_eq!(
            SignalingError::ConsumeFailed(EngineError::Closed).to_string(),
            "Failed to create consumer"
        );
    }

    #[test]
    fn test_from_registry_error() {
        let err: SignalingError = RegistryError::ConnectionNotFound(3).into();
        assert!(matches!(err, SignalingError::UnknownConnection));
    }
}
