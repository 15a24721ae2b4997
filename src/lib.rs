//! WebRTC-to-HLS live streaming server
//!
//! Browsers publish media over WebRTC through a small selective forwarding
//! layer. Every published producer is also forwarded as plain RTP to an
//! `ffmpeg` process that writes an HLS playlist, and a watcher on the output
//! directory decides which playlists are live.
//!
//! ```text
//!  browser ──ws──► signaling::Broker ──► engine (WebRTC transports)
//!                        │
//!                        └─ produce ──► bridge::TranscodingBridge ──► ffmpeg ──► hls/
//!                                                                                 │
//!  HTTP GET /api/streams ◄── liveness::LivenessSet ◄── liveness::LivenessWatcher ◄┘
//! ```
//!
//! The media engine is abstracted behind [`engine::MediaEngine`]; the
//! `mediasoup` feature provides the production implementation.

pub mod bridge;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod registry;
pub mod server;
pub mod signaling;
pub mod stats;

#[cfg(test)]
pub(crate) mod testutil;

pub use bridge::{BridgeConfig, TranscoderConfig, TranscodingBridge};
pub use engine::{MediaEngine, TransportConfig};
pub use error::{Error, Result};
pub use liveness::{LivenessSet, LivenessWatcher, WatcherConfig};
pub use registry::SessionRegistry;
pub use server::{ServerConfig, SignalingServer};
pub use signaling::Broker;
