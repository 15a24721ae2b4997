//! Transport factory
//!
//! Allocates browser-facing transports with one fixed configuration
//! (listen address, announced address, bitrate caps).

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use super::{EngineResult, MediaEngine, WebRtcTransport, WebRtcTransportOptions};

/// WebRTC transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local address transports listen on
    pub listen_ip: IpAddr,

    /// Address announced to peers in ICE candidates
    pub announced_ip: Option<String>,

    /// Cap on bitrate received from a peer (bits/sec)
    pub max_incoming_bitrate: u32,

    /// Initial outgoing bitrate estimate (bits/sec)
    pub initial_available_outgoing_bitrate: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            // Replace with the public address when deployed
            announced_ip: Some("127.0.0.1".into()),
            max_incoming_bitrate: 1_500_000,
            initial_available_outgoing_bitrate: 1_000_000,
        }
    }
}

impl TransportConfig {
    /// Set the listen address
    pub fn listen_ip(mut self, ip: IpAddr) -> Self {
        self.listen_ip = ip;
        self
    }

    /// Set the announced address
    pub fn announced_ip(mut self, ip: impl Into<String>) -> Self {
        self.announced_ip = Some(ip.into());
        self
    }

    /// Set the incoming bitrate cap
    pub fn max_incoming_bitrate(mut self, bitrate: u32) -> Self {
        self.max_incoming_bitrate = bitrate;
        self
    }

    fn to_options(&self) -> WebRtcTransportOptions {
        WebRtcTransportOptions {
            listen_ip: self.listen_ip,
            announced_ip: self.announced_ip.clone(),
            max_incoming_bitrate: Some(self.max_incoming_bitrate),
            initial_available_outgoing_bitrate: self.initial_available_outgoing_bitrate,
        }
    }
}

/// Creates WebRTC transports on the media engine
pub struct TransportFactory {
    engine: Arc<dyn MediaEngine>,
    options: WebRtcTransportOptions,
}

impl TransportFactory {
    /// Create a factory for the given engine
    pub fn new(engine: Arc<dyn MediaEngine>, config: &TransportConfig) -> Self {
        Self {
            engine,
            options: config.to_options(),
        }
    }

    /// Allocate a new transport
    pub async fn create(&self) -> EngineResult<Arc<dyn WebRtcTransport>> {
        let transport = self.engine.create_webrtc_transport(&self.options).await?;

        tracing::debug!(
            transport_id = %transport.id(),
            listen_ip = %self.options.listen_ip,
            "WebRTC transport created"
        );

        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeEngine;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();

        assert!(config.listen_ip.is_unspecified());
        assert_eq!(config.announced_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.max_incoming_bitrate, 1_500_000);
        assert_eq!(config.initial_available_outgoing_bitrate, 1_000_000);
    }

    #[test]
    fn test_builder_chaining() {
        let config = TransportConfig::default()
            .listen_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .announced_ip("203.0.113.7")
            .max_incoming_bitrate(800_000);

        let options = config.to_options();
        assert_eq!(options.listen_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(options.announced_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(options.max_incoming_bitrate, Some(800_000));
    }

    #[tokio::test]
    async fn test_factory_creates_distinct_transports() {
        let engine = FakeEngine::new();
        let factory = TransportFactory::new(engine.clone(), &TransportConfig::default());

        let first = factory.create().await.unwrap();
        let second = factory.create().await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(engine.webrtc_transports_created(), 2);
    }
}
