//! sfu-hls server binary
//!
//! Run with: cargo run --features mediasoup -- [OPTIONS]
//!
//! Publish from a browser over `/ws`, then play
//! `http://localhost:8000/hls/stream1.m3u8` once `/api/streams` lists it.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sfu_hls::engine::mediasoup::{EngineConfig, MediasoupEngine};
use sfu_hls::server::prepare_output_dir;
use sfu_hls::{
    BridgeConfig, Broker, LivenessWatcher, ServerConfig, SignalingServer, TranscoderConfig,
    TranscodingBridge, TransportConfig, WatcherConfig,
};

/// WebRTC signaling server with HLS output
#[derive(Parser, Debug)]
#[command(name = "sfu-hls", version, about)]
struct Cli {
    /// Address for HTTP and WebSocket
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Directory HLS playlists and segments are written to and served from
    #[arg(long, default_value = "hls")]
    output_dir: PathBuf,

    /// Directory for transcoder session description files (defaults to the
    /// output directory)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Address WebRTC transports listen on
    #[arg(long, default_value = "0.0.0.0")]
    listen_ip: IpAddr,

    /// Address announced to browsers in ICE candidates
    #[arg(long, default_value = "127.0.0.1")]
    announced_ip: String,

    /// Transcoder executable
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Keep files already present in the output directory
    #[arg(long)]
    keep_output: bool,

    /// Lowest WebRTC port
    #[arg(long, default_value_t = 10000)]
    rtc_min_port: u16,

    /// Highest WebRTC port
    #[arg(long, default_value_t = 20000)]
    rtc_max_port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    prepare_output_dir(&cli.output_dir, cli.keep_output).await?;

    let engine =
        MediasoupEngine::start(EngineConfig::default().rtc_ports(cli.rtc_min_port..=cli.rtc_max_port))
            .await?;

    let watcher = LivenessWatcher::start(WatcherConfig::new(&cli.output_dir))?;

    let mut bridge_config = BridgeConfig::default()
        .output_dir(&cli.output_dir)
        .transcoder(TranscoderConfig::default().program(&cli.ffmpeg));
    if let Some(dir) = &cli.scratch_dir {
        bridge_config = bridge_config.scratch_dir(dir);
    }
    let bridge = Arc::new(TranscodingBridge::new(engine.clone(), bridge_config));

    let worker_dead = engine.worker_dead();

    let transports = TransportConfig::default()
        .listen_ip(cli.listen_ip)
        .announced_ip(cli.announced_ip.as_str());
    let broker = Arc::new(Broker::new(engine, &transports).with_bridge(Arc::clone(&bridge)));

    let server_config = ServerConfig::with_addr(cli.bind).output_dir(&cli.output_dir);
    let server = SignalingServer::new(server_config, broker, watcher.set().clone());

    let dead = worker_dead.clone();
    let result = server
        .run_until(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                () = dead.cancelled() => {}
            }
        })
        .await;

    bridge.shutdown().await;
    watcher.stop().await;

    result?;
    if worker_dead.is_cancelled() {
        tracing::error!("Exiting after media worker death");
        std::process::exit(1);
    }
    Ok(())
}
