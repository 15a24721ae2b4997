//! Transcoding bridge
//!
//! Forks each new producer into an external transcoder that writes a rolling
//! HLS playlist into the output directory.
//!
//! ```text
//!  Producer ──► Consumer on OutputLeg (plain RTP) ──UDP P/P+1──► ffmpeg
//!                                                       │
//!                    <scratch or output>/<stream>.sdp ──┘
//!                                                       ▼
//!                                        <output>/<stream>.m3u8 + segments
//! ```
//!
//! Failures here never reach the peer that produced. They are logged and
//! counted in [`BridgeStats`].

pub mod output;
pub mod sdp;
pub mod supervisor;
pub mod transcoder;

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::engine::{ConsumeRequest, EngineError, MediaEngine, MediaKind, RtpCodec};
use crate::stats::BridgeStats;

pub use output::{OutputLeg, OutputLegs};
pub use sdp::SessionDescription;
pub use supervisor::{JobFile, TranscodeJob, TranscodeSupervisor};
pub use transcoder::TranscoderConfig;

/// Error raised while starting a transcode job
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Engine request failed
    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    /// No local UDP port pair could be reserved
    #[error("failed to allocate forwarding ports: {0}")]
    PortAllocation(#[source] io::Error),

    /// Session description could not be written
    #[error("failed to write {}: {source}", .path.display())]
    Description {
        /// Target path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Transcoder process could not be spawned
    #[error("failed to spawn transcoder: {0}")]
    Spawn(#[source] io::Error),

    /// Bridge is shutting down
    #[error("bridge is shut down")]
    ShutDown,
}

/// Transcoding bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the output legs and transcoders use
    pub listen_ip: IpAddr,

    /// Directory playlists and segments are written to
    pub output_dir: PathBuf,

    /// Directory for session description files (the output directory when
    /// unset)
    pub scratch_dir: Option<PathBuf>,

    /// Transcoder invocation
    pub transcoder: TranscoderConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            output_dir: PathBuf::from("hls"),
            scratch_dir: None,
            transcoder: TranscoderConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Set the output directory
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the scratch directory
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Set the forwarding address
    pub fn listen_ip(mut self, ip: IpAddr) -> Self {
        self.listen_ip = ip;
        self
    }

    /// Set the transcoder configuration
    pub fn transcoder(mut self, transcoder: TranscoderConfig) -> Self {
        self.transcoder = transcoder;
        self
    }

    fn sdp_path(&self, stream_name: &str) -> PathBuf {
        self.scratch_dir
            .as_deref()
            .unwrap_or(&self.output_dir)
            .join(format!("{}.sdp", stream_name))
    }

    fn playlist_path(&self, stream_name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.m3u8", stream_name))
    }
}

/// Request to forward one producer into a transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Stream name (`stream<N>`)
    pub stream_name: String,
    /// Producer to forward
    pub producer_id: String,
    /// Producer media kind
    pub kind: MediaKind,
}

/// Bridge from producers to transcoder processes
pub struct TranscodingBridge {
    engine: Arc<dyn MediaEngine>,
    config: BridgeConfig,
    legs: OutputLegs,
    supervisor: TranscodeSupervisor,
    stats: Arc<BridgeStats>,
}

impl TranscodingBridge {
    /// Create a bridge on the given engine
    pub fn new(engine: Arc<dyn MediaEngine>, config: BridgeConfig) -> Self {
        let stats = Arc::new(BridgeStats::new());
        Self {
            legs: OutputLegs::new(Arc::clone(&engine), config.listen_ip),
            supervisor: TranscodeSupervisor::new(Arc::clone(&stats)),
            engine,
            config,
            stats,
        }
    }

    /// Bridge counters
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Job supervisor
    pub fn supervisor(&self) -> &TranscodeSupervisor {
        &self.supervisor
    }

    /// Output directory
    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Forward a producer and start its transcoder
    ///
    /// Any job already running under the stream name is stopped first.
    /// Returns the transcoder's process id.
    pub async fn forward(&self, request: ForwardRequest) -> Result<Option<u32>, BridgeError> {
        let ForwardRequest {
            stream_name,
            producer_id,
            kind,
        } = request;

        let leg = self.legs.get_or_create(&stream_name).await?;

        let consumer = leg
            .transport
            .consume(ConsumeRequest {
                producer_id,
                rtp_capabilities: self.engine.rtp_capabilities(),
                paused: false,
            })
            .await?;

        let codec = RtpCodec::from_rtp_parameters(&consumer.rtp_parameters())
            .unwrap_or_else(|| RtpCodec::default_for(kind));
        let description = SessionDescription::new(&leg.endpoint, kind, codec);

        let sdp_path = self.config.sdp_path(&stream_name);
        let playlist_path = self.config.playlist_path(&stream_name);
        let command = self
            .config
            .transcoder
            .command(kind, &sdp_path, &playlist_path);

        tracing::debug!(
            stream = %stream_name,
            consumer_id = %consumer.id(),
            rtp_port = leg.endpoint.rtp_port,
            playlist = %playlist_path.display(),
            "Forwarding producer"
        );

        self.supervisor
            .start(TranscodeJob {
                stream_name,
                command,
                input: Some(JobFile {
                    path: sdp_path,
                    contents: description.render(),
                }),
                forward: Some(consumer),
            })
            .await
    }

    /// Run [`forward`](Self::forward) in the background
    ///
    /// Failures are logged and counted, never returned.
    pub fn spawn_forward(self: &Arc<Self>, request: ForwardRequest) -> JoinHandle<()> {
        self.stats.record_forward();
        let bridge = Arc::clone(self);

        tokio::spawn(async move {
            let stream_name = request.stream_name.clone();
            if let Err(e) = bridge.forward(request).await {
                bridge.stats.record_failure();
                tracing::error!(stream = %stream_name, error = %e, "Failed to start transcoder");
            }
        })
    }

    /// Stop every transcoder and close every output leg
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        self.legs.close_all().await;
        tracing::info!("Transcoding bridge stopped");
    }
}
