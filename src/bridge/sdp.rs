//! Session description for the transcoder input
//!
//! The transcoder does not speak WebRTC. It reads a minimal SDP file naming
//! the UDP port the forwarded RTP arrives on and the codec it carries.

use std::fmt::Write as _;
use std::net::IpAddr;

use crate::engine::{ForwardEndpoint, MediaKind, RtpCodec};

/// Single-stream SDP describing one forwarded RTP flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Address the transcoder listens on
    pub address: IpAddr,
    /// RTP port (RTCP is the next port up)
    pub port: u16,
    /// Media kind
    pub kind: MediaKind,
    /// Codec carried on the port
    pub codec: RtpCodec,
}

impl SessionDescription {
    /// Describe an endpoint carrying the given codec
    pub fn new(endpoint: &ForwardEndpoint, kind: MediaKind, codec: RtpCodec) -> Self {
        Self {
            address: endpoint.ip,
            port: endpoint.rtp_port,
            kind,
            codec,
        }
    }

    /// Render the SDP text
    pub fn render(&self) -> String {
        let family = match self.address {
            IpAddr::V4(_) => "IP4",
            IpAddr::V6(_) => "IP6",
        };

        let mut sdp = String::with_capacity(160);
        let _ = writeln!(sdp, "v=0");
        let _ = writeln!(sdp, "o=- 0 0 IN {} {}", family, self.address);
        let _ = writeln!(sdp, "s=No Name");
        let _ = writeln!(sdp, "c=IN {} {}", family, self.address);
        let _ = writeln!(sdp, "t=0 0");
        let _ = writeln!(
            sdp,
            "m={} {} RTP/AVP {}",
            self.kind, self.port, self.codec.payload_type
        );
        let _ = writeln!(sdp, "a=rtpmap:{} {}", self.codec.payload_type, self.codec.rtpmap());
        sdp
    }
}
