//! Output legs
//!
//! An output leg is an engine plain transport pointed at a local UDP port
//! pair the transcoder listens on. Legs are created once per stream name and
//! reused by every later job under that name.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::BridgeError;
use crate::engine::{ForwardEndpoint, MediaEngine, PlainTransport, PlainTransportOptions};

const PORT_ATTEMPTS: usize = 16;

/// Plain transport and the endpoint it sends to
pub struct OutputLeg {
    /// Engine-side transport
    pub transport: Arc<dyn PlainTransport>,
    /// Where the transcoder receives RTP
    pub endpoint: ForwardEndpoint,
}

/// Memoized output legs keyed by stream name
pub struct OutputLegs {
    engine: Arc<dyn MediaEngine>,
    listen_ip: IpAddr,
    legs: Mutex<HashMap<String, Arc<OutputLeg>>>,
}

impl OutputLegs {
    /// Create an empty set bound to one address
    pub fn new(engine: Arc<dyn MediaEngine>, listen_ip: IpAddr) -> Self {
        Self {
            engine,
            listen_ip,
            legs: Mutex::new(HashMap::new()),
        }
    }

    /// Return the leg for a stream name, creating it on first use
    pub async fn get_or_create(&self, stream_name: &str) -> Result<Arc<OutputLeg>, BridgeError> {
        let mut legs = self.legs.lock().await;
        if let Some(leg) = legs.get(stream_name) {
            return Ok(Arc::clone(leg));
        }

        let endpoint = allocate_port_pair(self.listen_ip).map_err(BridgeError::PortAllocation)?;
        let options = PlainTransportOptions {
            listen_ip: self.listen_ip,
            rtcp_mux: false,
            comedia: false,
        };
        let transport = self.engine.create_plain_transport(&options).await?;

        if let Err(e) = transport.connect(endpoint).await {
            let _ = transport.close();
            return Err(e.into());
        }

        tracing::debug!(
            stream = %stream_name,
            transport_id = %transport.id(),
            rtp_port = endpoint.rtp_port,
            "Output leg created"
        );

        let leg = Arc::new(OutputLeg {
            transport,
            endpoint,
        });
        let _ = legs.insert(stream_name.to_string(), Arc::clone(&leg));
        Ok(leg)
    }

    /// Number of legs created
    pub async fn len(&self) -> usize {
        self.legs.lock().await.len()
    }

    /// Close and forget every leg
    pub async fn close_all(&self) {
        let legs: Vec<(String, Arc<OutputLeg>)> = self.legs.lock().await.drain().collect();
        for (stream_name, leg) in legs {
            if let Err(e) = leg.transport.close() {
                tracing::debug!(stream = %stream_name, error = %e, "Failed to close output leg");
            }
        }
    }
}

/// Find a free UDP port pair `(P, P + 1)` on the address
///
/// The probe sockets are released before returning so the transcoder can
/// bind them.
pub fn allocate_port_pair(ip: IpAddr) -> io::Result<ForwardEndpoint> {
    for _ in 0..PORT_ATTEMPTS {
        let rtp = UdpSocket::bind(SocketAddr::new(ip, 0))?;
        let port = rtp.local_addr()?.port();
        let Some(rtcp_port) = port.checked_add(1) else {
            continue;
        };

        if UdpSocket::bind(SocketAddr::new(ip, rtcp_port)).is_ok() {
            return Ok(ForwardEndpoint {
                ip,
                rtp_port: port,
                rtcp_port: Some(rtcp_port),
            });
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        "no free UDP port pair",
    ))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::testutil::FakeEngine;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_port_pair_is_consecutive() {
        let endpoint = allocate_port_pair(LOCALHOST).unwrap();
        assert_eq!(endpoint.ip, LOCALHOST);
        assert_eq!(endpoint.rtcp_port, Some(endpoint.rtp_port + 1));

        // Both ports are free again
        UdpSocket::bind(endpoint.rtp_addr()).unwrap();
        UdpSocket::bind(SocketAddr::new(LOCALHOST, endpoint.rtp_port + 1)).unwrap();
    }

    #[tokio::test]
    async fn test_leg_memoized_per_stream() {
        let engine = FakeEngine::new();
        let legs = OutputLegs::new(engine.clone(), LOCALHOST);

        let first = legs.get_or_create("stream1").await.unwrap();
        let again = legs.get_or_create("stream1").await.unwrap();
        let other = legs.get_or_create("stream2").await.unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert_ne!(first.transport.id(), other.transport.id());
        assert_eq!(engine.plain_transports_created(), 2);
        assert_eq!(legs.len().await, 2);

        // Transport points at the allocated endpoint
        assert_eq!(engine.plain_connects()[0], first.endpoint);
    }

    #[tokio::test]
    async fn test_close_all() {
        let engine = FakeEngine::new();
        let legs = OutputLegs::new(engine.clone(), LOCALHOST);
        let leg = legs.get_or_create("stream1").await.unwrap();

        legs.close_all().await;
        assert_eq!(legs.len().await, 0);
        assert!(engine.is_closed(&leg.transport.id()));
    }

    #[tokio::test]
    async fn test_engine_failure() {
        let engine = FakeEngine::new();
        engine.set_fail_transports(true);
        let legs = OutputLegs::new(engine.clone(), LOCALHOST);

        let result = legs.get_or_create("stream1").await;
        assert!(matches!(result, Err(BridgeError::Engine(_))));
        assert_eq!(legs.len().await, 0);
    }
}
