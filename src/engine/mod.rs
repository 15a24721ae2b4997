//! Media engine boundary
//!
//! The broker never touches RTP, ICE or DTLS itself. Everything media-related
//! goes through the traits in this module, which a concrete engine (the
//! `mediasoup` adapter, or a scripted engine in tests) implements.
//!
//! ```text
//!   MediaEngine ──create_webrtc_transport──► WebRtcTransport ──produce──► Producer
//!        │                                         └──────────consume──► Consumer
//!        └────────create_plain_transport───► PlainTransport ───consume──► Consumer
//! ```
//!
//! Negotiation payloads (`rtpParameters`, `dtlsParameters`,
//! `rtpCapabilities`) are opaque to the broker and travel as JSON values.
//! Handles are closed explicitly with `close()`; closing twice is harmless.

pub mod transport;

#[cfg(feature = "mediasoup")]
pub mod mediasoup;

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use transport::{TransportConfig, TransportFactory};

/// Result alias for engine requests
pub type EngineResult<T> = Result<T, EngineError>;

/// Error returned by the media engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Negotiation payload could not be interpreted
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// Engine rejected or failed the request
    #[error("engine request failed: {0}")]
    Request(String),
    /// The handle was already closed
    #[error("engine object closed")]
    Closed,
}

/// Kind of media carried by a producer or consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl MediaKind {
    /// Lowercase name as used in SDP media lines and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec negotiated for one RTP stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpCodec {
    /// RTP payload type
    pub payload_type: u8,
    /// MIME type, e.g. `video/VP8`
    pub mime_type: String,
    /// Clock rate in Hz
    pub clock_rate: u32,
    /// Audio channel count
    pub channels: Option<u8>,
}

impl RtpCodec {
    /// Codec assumed when the engine does not report one
    ///
    /// Matches the codecs the router is configured with: VP8 for video and
    /// stereo Opus for audio.
    pub fn default_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => Self {
                payload_type: 96,
                mime_type: "video/VP8".into(),
                clock_rate: 90_000,
                channels: None,
            },
            MediaKind::Audio => Self {
                payload_type: 97,
                mime_type: "audio/opus".into(),
                clock_rate: 48_000,
                channels: Some(2),
            },
        }
    }

    /// Extract the first codec from an `rtpParameters` object
    pub fn from_rtp_parameters(rtp_parameters: &Value) -> Option<Self> {
        let codec = rtp_parameters.get("codecs")?.as_array()?.first()?;

        let payload_type = u8::try_from(codec.get("payloadType")?.as_u64()?).ok()?;
        let mime_type = codec.get("mimeType")?.as_str()?.to_string();
        let clock_rate = u32::try_from(codec.get("clockRate")?.as_u64()?).ok()?;
        let channels = codec
            .get("channels")
            .and_then(Value::as_u64)
            .and_then(|c| u8::try_from(c).ok());

        Some(Self {
            payload_type,
            mime_type,
            clock_rate,
            channels,
        })
    }

    /// Encoding name without the media type prefix (`VP8`, `opus`)
    pub fn encoding_name(&self) -> &str {
        self.mime_type
            .split_once('/')
            .map_or(self.mime_type.as_str(), |(_, name)| name)
    }

    /// Value of an SDP `a=rtpmap` attribute after the payload type
    pub fn rtpmap(&self) -> String {
        match self.channels {
            Some(channels) => format!("{}/{}/{}", self.encoding_name(), self.clock_rate, channels),
            None => format!("{}/{}", self.encoding_name(), self.clock_rate),
        }
    }
}

/// Remote endpoint a plain transport sends RTP to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardEndpoint {
    /// Address the receiver listens on
    pub ip: IpAddr,
    /// RTP port
    pub rtp_port: u16,
    /// RTCP port (`None` when RTCP is multiplexed)
    pub rtcp_port: Option<u16>,
}

impl ForwardEndpoint {
    /// Socket address of the RTP port
    pub fn rtp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.rtp_port)
    }
}

/// Options for a browser-facing WebRTC transport
#[derive(Debug, Clone)]
pub struct WebRtcTransportOptions {
    /// Local address to bind
    pub listen_ip: IpAddr,
    /// Address announced in ICE candidates
    pub announced_ip: Option<String>,
    /// Cap on incoming bitrate (bits per second)
    pub max_incoming_bitrate: Option<u32>,
    /// Initial outgoing bitrate estimate (bits per second)
    pub initial_available_outgoing_bitrate: u32,
}

/// Options for an engine-internal plain RTP transport
#[derive(Debug, Clone)]
pub struct PlainTransportOptions {
    /// Local address to bind
    pub listen_ip: IpAddr,
    /// Multiplex RTP and RTCP on one port
    pub rtcp_mux: bool,
    /// Learn the remote address from the first packet received
    pub comedia: bool,
}

/// Request to create a consumer for a producer
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    /// Producer to forward
    pub producer_id: String,
    /// Capabilities of the receiving side
    pub rtp_capabilities: Value,
    /// Create the consumer paused
    pub paused: bool,
}

/// The media engine (router) every transport is created on
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Capability set peers negotiate against
    fn rtp_capabilities(&self) -> Value;

    /// Whether a receiver with these capabilities can consume the producer
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &Value) -> bool;

    /// Create a browser-facing transport
    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> EngineResult<Arc<dyn WebRtcTransport>>;

    /// Create an engine-internal plain RTP transport
    async fn create_plain_transport(
        &self,
        options: &PlainTransportOptions,
    ) -> EngineResult<Arc<dyn PlainTransport>>;
}

/// A negotiated WebRTC transport for one peer leg
#[async_trait]
pub trait WebRtcTransport: Send + Sync {
    /// Transport id
    fn id(&self) -> String;

    /// Connection parameters sent to the peer
    /// (`{id, iceParameters, iceCandidates, dtlsParameters}`)
    fn parameters(&self) -> Value;

    /// Complete the DTLS handshake with the peer's parameters
    async fn connect(&self, dtls_parameters: Value) -> EngineResult<()>;

    /// Create a producer from the peer's RTP parameters
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> EngineResult<Arc<dyn Producer>>;

    /// Create a consumer forwarding a producer to the peer
    async fn consume(&self, request: ConsumeRequest) -> EngineResult<Arc<dyn Consumer>>;

    /// Close the transport
    fn close(&self) -> EngineResult<()>;
}

/// A plain RTP transport used to forward media out of the engine
#[async_trait]
pub trait PlainTransport: Send + Sync {
    /// Transport id
    fn id(&self) -> String;

    /// Point the transport at the receiver
    async fn connect(&self, remote: ForwardEndpoint) -> EngineResult<()>;

    /// Create a consumer forwarding a producer to the receiver
    async fn consume(&self, request: ConsumeRequest) -> EngineResult<Arc<dyn Consumer>>;

    /// Close the transport
    fn close(&self) -> EngineResult<()>;
}

/// Inbound media stream from a peer
pub trait Producer: Send + Sync {
    /// Producer id
    fn id(&self) -> String;

    /// Media kind
    fn kind(&self) -> MediaKind;

    /// Close the producer
    fn close(&self) -> EngineResult<()>;
}

/// Outbound forwarding of a producer
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Consumer id
    fn id(&self) -> String;

    /// Id of the producer being forwarded
    fn producer_id(&self) -> String;

    /// Media kind
    fn kind(&self) -> MediaKind;

    /// RTP parameters the receiver must use
    fn rtp_parameters(&self) -> Value;

    /// Consumer type (`simple`, `simulcast`, ...)
    fn consumer_type(&self) -> String;

    /// Whether the consumer is currently paused
    fn paused(&self) -> bool;

    /// Resume a paused consumer
    async fn resume(&self) -> EngineResult<()>;

    /// Close the consumer
    fn close(&self) -> EngineResult<()>;
}
