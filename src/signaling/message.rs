//! Signaling wire format
//!
//! Requests are JSON objects tagged by `type` with their payload fields at
//! the top level. Every outbound message is `{"type": ..., "data": ...}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::MediaKind;
use crate::registry::Frame;

/// Request sent by a peer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Ask for the router's capability set
    GetRouterRtpCapabilities,
    /// Allocate a transport for sending media
    CreateProducerTransport,
    /// Complete DTLS on the producer transport
    ConnectProducerTransport {
        /// Peer DTLS parameters
        dtls_parameters: Value,
    },
    /// Start sending media
    Produce {
        /// Media kind
        kind: MediaKind,
        /// Peer RTP parameters
        rtp_parameters: Value,
    },
    /// Stop sending media, keeping the transport
    CloseProducer,
    /// Allocate a transport for receiving media
    CreateConsumerTransport,
    /// Complete DTLS on the consumer transport
    ConnectConsumerTransport {
        /// Peer DTLS parameters
        dtls_parameters: Value,
    },
    /// Receive the first producer owned by another connection
    Consume {
        /// Peer RTP capabilities
        rtp_capabilities: Value,
    },
    /// Resume the paused consumer
    Resume,
}

/// Request `type` values this broker understands
const KNOWN_TYPES: &[&str] = &[
    "getRouterRtpCapabilities",
    "createProducerTransport",
    "connectProducerTransport",
    "produce",
    "closeProducer",
    "createConsumerTransport",
    "connectConsumerTransport",
    "consume",
    "resume",
];

/// Result of parsing one inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// A well-formed request
    Message(ClientMessage),
    /// Valid JSON object with an unrecognized `type`
    Unknown(String),
    /// Not JSON, not an object, no string `type`, or a bad payload
    Malformed(String),
}

impl Parsed {
    /// Parse a text frame
    pub fn from_text(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Parsed::Malformed(e.to_string()),
        };

        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Parsed::Malformed("missing string `type`".into());
        };

        if !KNOWN_TYPES.contains(&kind) {
            return Parsed::Unknown(kind.to_string());
        }

        match serde_json::from_value(value) {
            Ok(message) => Parsed::Message(message),
            Err(e) => Parsed::Malformed(e.to_string()),
        }
    }
}

/// Reply to `getRouterRtpCapabilities`
pub const ROUTER_CAPABILITIES: &str = "routerCapabilities";
/// Reply to `createProducerTransport`
pub const PRODUCER_TRANSPORT_CREATED: &str = "producerTransportCreated";
/// Reply to `connectProducerTransport`
pub const PRODUCER_CONNECTED: &str = "producerConnected";
/// Reply to `produce`
pub const PRODUCED: &str = "produced";
/// Reply to `closeProducer`
pub const PRODUCER_CLOSED: &str = "producerClosed";
/// Sent to every other connection after a `produce`
pub const NEW_PRODUCER: &str = "newProducer";
/// Reply to `createConsumerTransport`
pub const SUB_TRANSPORT_CREATED: &str = "subTransportCreated";
/// Reply to `connectConsumerTransport`
pub const SUB_CONNECTED: &str = "subConnected";
/// Reply to `consume`
pub const SUBSCRIBED: &str = "subscribed";
/// Reply to `resume`
pub const RESUMED: &str = "resumed";
/// Failed request
pub const ERROR: &str = "error";

/// Outbound message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    /// Message type
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Payload
    pub data: Value,
}

impl Reply {
    /// Build a reply from any serializable payload
    pub fn new(kind: &'static str, data: impl Serialize) -> Self {
        Self {
            kind,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    /// `error` reply with a human-readable message
    pub fn error(message: impl ToString) -> Self {
        Self {
            kind: ERROR,
            data: Value::String(message.to_string()),
        }
    }

    /// Serialize for the outbound queue
    pub fn to_frame(&self) -> Frame {
        let value = serde_json::json!({ "type": self.kind, "data": self.data });
        Arc::from(value.to_string())
    }
}

/// Payload of `produced` and `producerClosed`
#[derive(Debug, Clone, Serialize)]
pub struct ProducerId {
    /// Producer id
    pub id: String,
}

/// Payload of `subscribed`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscribed {
    /// Producer being consumed
    pub producer_id: String,
    /// Consumer id
    pub id: String,
    /// Media kind
    pub kind: MediaKind,
    /// RTP parameters for the receiver
    pub rtp_parameters: Value,
    /// Consumer type
    #[serde(rename = "type")]
    pub consumer_type: String,
    /// Whether the consumer starts paused
    pub producer_paused: bool,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_unit_requests() {
        assert_eq!(
            Parsed::from_text(r#"{"type":"getRouterRtpCapabilities"}"#),
            Parsed::Message(ClientMessage::GetRouterRtpCapabilities)
        );
        // Extra fields are ignored
        assert_eq!(
            Parsed::from_text(r#"{"type":"resume","data":null}"#),
            Parsed::Message(ClientMessage::Resume)
        );
    }

    #[test]
    fn test_parse_payload_fields() {
        let text = r#"{"type":"produce","kind":"video","rtpParameters":{"codecs":[]}}"#;
        assert_eq!(
            Parsed::from_text(text),
            Parsed::Message(ClientMessage::Produce {
                kind: MediaKind::Video,
                rtp_parameters: json!({"codecs": []}),
            })
        );

        let text = r#"{"type":"connectConsumerTransport","dtlsParameters":{"role":"client"}}"#;
        assert_eq!(
            Parsed::from_text(text),
            Parsed::Message(ClientMessage::ConnectConsumerTransport {
                dtls_parameters: json!({"role": "client"}),
            })
        );
    }

    #[test]
    fn test_parse_unknown_type() {
        assert_eq!(
            Parsed::from_text(r#"{"type":"dance"}"#),
            Parsed::Unknown("dance".into())
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(Parsed::from_text("not json"), Parsed::Malformed(_)));
        assert!(matches!(Parsed::from_text("[1,2]"), Parsed::Malformed(_)));
        assert!(matches!(Parsed::from_text(r#"{"kind":"x"}"#), Parsed::Malformed(_)));
        assert!(matches!(Parsed::from_text(r#"{"type":7}"#), Parsed::Malformed(_)));
        // Known type, missing payload
        assert!(matches!(
            Parsed::from_text(r#"{"type":"consume"}"#),
            Parsed::Malformed(_)
        ));
        // Known type, bad kind
        assert!(matches!(
            Parsed::from_text(r#"{"type":"produce","kind":"data","rtpParameters":{}}"#),
            Parsed::Malformed(_)
        ));
    }

    #[test]
    fn test_reply_frames() {
        let frame = Reply::new(PRODUCED, ProducerId { id: "p1".into() }).to_frame();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "produced", "data": {"id": "p1"}}));

        let frame = Reply::error("No other producers available").to_frame();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "error", "data": "No other producers available"}));
    }

    #[test]
    fn test_subscribed_field_names() {
        let data = Subscribed {
            producer_id: "p1".into(),
            id: "c1".into(),
            kind: MediaKind::Video,
            rtp_parameters: json!({}),
            consumer_type: "simple".into(),
            producer_paused: true,
        };
        assert_eq!(
            serde_json::to_value(data).unwrap(),
            json!({
                "producerId": "p1",
                "id": "c1",
                "kind": "video",
                "rtpParameters": {},
                "type": "simple",
                "producerPaused": true
            })
        );
    }
}
