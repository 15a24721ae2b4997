//! HTTP/WebSocket boundary
//!
//! Serves the signaling WebSocket, the HLS output directory, the live stream
//! list and a health endpoint from one axum router.

pub mod bootstrap;
pub mod config;
pub mod http;
pub mod listener;

pub use bootstrap::{clear_directory_contents, prepare_output_dir};
pub use config::ServerConfig;
pub use http::{HealthResponse, StreamsResponse};
pub use listener::SignalingServer;
