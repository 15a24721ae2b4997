//! HTTP response bodies

use std::time::Instant;

use serde::Serialize;

use crate::liveness::LivenessSet;

/// `GET /api/streams` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StreamsResponse {
    /// At least one playlist is live
    Live {
        /// Live playlist file names, sorted
        streams: Vec<String>,
    },
    /// Nothing is live
    Offline,
}

impl StreamsResponse {
    /// Build from the current liveness set
    pub fn from_set(set: &LivenessSet) -> Self {
        let streams = set.snapshot();
        if streams.is_empty() {
            StreamsResponse::Offline
        } else {
            StreamsResponse::Live { streams }
        }
    }
}

/// `GET /health` body
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running
    pub status: String,
    /// Seconds since the server started
    pub uptime_secs: u64,
    /// Open signaling connections
    pub connections: usize,
    /// Active producers
    pub producers: usize,
    /// Running transcode jobs
    pub transcode_jobs: usize,
    /// Forward attempts that failed
    pub bridge_failures: u64,
}

impl HealthResponse {
    /// Build a health response from live counters
    pub fn new(
        start_time: Instant,
        connections: usize,
        producers: usize,
        transcode_jobs: usize,
        bridge_failures: u64,
    ) -> Self {
        Self {
            status: "ok".into(),
            uptime_secs: start_time.elapsed().as_secs(),
            connections,
            producers,
            transcode_jobs,
            bridge_failures,
        }
    }
}
