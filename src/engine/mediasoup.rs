//! mediasoup-backed media engine
//!
//! One worker, one router. mediasoup handles close when their last reference
//! is dropped, so each adapter keeps its handle in an `Option` and `close()`
//! takes it out.

use std::net::IpAddr;
use std::num::{NonZeroU32, NonZeroU8};
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use mediasoup::prelude::{
    ConsumerOptions, ListenInfo, PlainTransportRemoteParameters, ProducerOptions, Protocol,
    RouterOptions, RtpCapabilities, RtpCodecCapability, RtpCodecParametersParameters,
    RtpParameters, Transport, WebRtcTransportListenInfos, WebRtcTransportRemoteParameters,
    WorkerSettings,
};
use mediasoup::producer::ProducerId;
use mediasoup::router::Router;
use mediasoup::rtp_parameters::{MediaKind as RtpMediaKind, MimeTypeAudio, MimeTypeVideo};
use mediasoup::worker::Worker;
use mediasoup::worker_manager::WorkerManager;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{
    ConsumeRequest, Consumer, EngineError, EngineResult, ForwardEndpoint, MediaEngine, MediaKind,
    PlainTransport, PlainTransportOptions, Producer, WebRtcTransport, WebRtcTransportOptions,
};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// UDP/TCP port range for WebRTC transports
    pub rtc_ports: RangeInclusive<u16>,

    /// Start bitrate hint for VP8 (kbps)
    pub video_start_bitrate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rtc_ports: 10000..=20000,
            video_start_bitrate: 1000,
        }
    }
}

impl EngineConfig {
    /// Set the WebRTC port range
    pub fn rtc_ports(mut self, ports: RangeInclusive<u16>) -> Self {
        self.rtc_ports = ports;
        self
    }
}

fn request_failed(e: impl std::fmt::Display) -> EngineError {
    EngineError::Request(e.to_string())
}

fn from_json<T: DeserializeOwned>(value: Value) -> EngineResult<T> {
    serde_json::from_value(value).map_err(|e| EngineError::InvalidParameters(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn rtp_kind(kind: MediaKind) -> RtpMediaKind {
    match kind {
        MediaKind::Audio => RtpMediaKind::Audio,
        MediaKind::Video => RtpMediaKind::Video,
    }
}

fn media_kind(kind: RtpMediaKind) -> MediaKind {
    match kind {
        RtpMediaKind::Audio => MediaKind::Audio,
        RtpMediaKind::Video => MediaKind::Video,
    }
}

fn parse_producer_id(id: &str) -> EngineResult<ProducerId> {
    from_json(Value::String(id.to_string()))
}

fn listen_info(ip: IpAddr, announced: Option<String>, ports: Option<RangeInclusive<u16>>) -> ListenInfo {
    ListenInfo {
        protocol: Protocol::Udp,
        ip,
        announced_address: announced,
        expose_internal_ip: false,
        port: None,
        port_range: ports,
        flags: None,
        send_buffer_size: None,
        recv_buffer_size: None,
    }
}

/// Router codecs: stereo Opus and VP8
fn media_codecs(config: &EngineConfig) -> EngineResult<Vec<RtpCodecCapability>> {
    let invalid = || EngineError::InvalidParameters("zero codec rate".into());

    Ok(vec![
        RtpCodecCapability::Audio {
            mime_type: MimeTypeAudio::Opus,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(48_000).ok_or_else(invalid)?,
            channels: NonZeroU8::new(2).ok_or_else(invalid)?,
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![],
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp8,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(90_000).ok_or_else(invalid)?,
            parameters: RtpCodecParametersParameters::from([(
                "x-google-start-bitrate",
                config.video_start_bitrate.into(),
            )]),
            rtcp_feedback: vec![],
        },
    ])
}

/// Media engine backed by a mediasoup worker and router
pub struct MediasoupEngine {
    config: EngineConfig,
    router: Router,
    worker_dead: CancellationToken,
    _worker: Worker,
    _manager: WorkerManager,
}

impl MediasoupEngine {
    /// Spawn a worker and create the router
    pub async fn start(config: EngineConfig) -> EngineResult<Arc<Self>> {
        let manager = WorkerManager::new();
        let worker = manager
            .create_worker(WorkerSettings::default())
            .await
            .map_err(request_failed)?;

        let worker_dead = CancellationToken::new();
        let dead = worker_dead.clone();
        worker
            .on_dead(move |reason| {
                tracing::error!(reason = ?reason, "mediasoup worker died");
                dead.cancel();
            })
            .detach();

        let router = worker
            .create_router(RouterOptions::new(media_codecs(&config)?))
            .await
            .map_err(request_failed)?;

        tracing::info!(
            worker_id = %worker.id(),
            router_id = %router.id(),
            rtc_ports = ?config.rtc_ports,
            "Media engine started"
        );

        Ok(Arc::new(Self {
            config,
            router,
            worker_dead,
            _worker: worker,
            _manager: manager,
        }))
    }

    /// Token cancelled when the worker process dies
    ///
    /// The router is unusable afterwards; the process should exit.
    pub fn worker_dead(&self) -> CancellationToken {
        self.worker_dead.clone()
    }
}

#[async_trait]
impl MediaEngine for MediasoupEngine {
    fn rtp_capabilities(&self) -> Value {
        to_json(self.router.rtp_capabilities())
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &Value) -> bool {
        let Ok(id) = parse_producer_id(producer_id) else {
            return false;
        };
        let Ok(caps) = from_json::<RtpCapabilities>(rtp_capabilities.clone()) else {
            return false;
        };
        self.router.can_consume(&id, &caps)
    }

    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> EngineResult<Arc<dyn WebRtcTransport>> {
        let info = listen_info(
            options.listen_ip,
            options.announced_ip.clone(),
            Some(self.config.rtc_ports.clone()),
        );
        let mut transport_options =
            mediasoup::prelude::WebRtcTransportOptions::new(WebRtcTransportListenInfos::new(info));
        transport_options.initial_available_outgoing_bitrate =
            options.initial_available_outgoing_bitrate;

        let transport = self
            .router
            .create_webrtc_transport(transport_options)
            .await
            .map_err(request_failed)?;

        if let Some(bitrate) = options.max_incoming_bitrate {
            if let Err(e) = transport.set_max_incoming_bitrate(bitrate).await {
                tracing::warn!(transport_id = %transport.id(), error = %e, "Failed to cap incoming bitrate");
            }
        }

        Ok(Arc::new(MediasoupWebRtcTransport {
            id: transport.id().to_string(),
            inner: Mutex::new(Some(transport)),
        }))
    }

    async fn create_plain_transport(
        &self,
        options: &PlainTransportOptions,
    ) -> EngineResult<Arc<dyn PlainTransport>> {
        let info = listen_info(options.listen_ip, None, None);
        let mut transport_options = mediasoup::prelude::PlainTransportOptions::new(info);
        transport_options.rtcp_mux = options.rtcp_mux;
        transport_options.comedia = options.comedia;

        let transport = self
            .router
            .create_plain_transport(transport_options)
            .await
            .map_err(request_failed)?;

        Ok(Arc::new(MediasoupPlainTransport {
            id: transport.id().to_string(),
            inner: Mutex::new(Some(transport)),
        }))
    }
}

type WebRtcHandle = mediasoup::webrtc_transport::WebRtcTransport;
type PlainHandle = mediasoup::plain_transport::PlainTransport;

struct MediasoupWebRtcTransport {
    id: String,
    inner: Mutex<Option<WebRtcHandle>>,
}

impl MediasoupWebRtcTransport {
    fn handle(&self) -> EngineResult<WebRtcHandle> {
        self.inner.lock().clone().ok_or(EngineError::Closed)
    }
}

#[async_trait]
impl WebRtcTransport for MediasoupWebRtcTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn parameters(&self) -> Value {
        match self.inner.lock().as_ref() {
            Some(t) => json!({
                "id": self.id,
                "iceParameters": to_json(t.ice_parameters()),
                "iceCandidates": to_json(t.ice_candidates()),
                "dtlsParameters": to_json(&t.dtls_parameters()),
            }),
            None => json!({ "id": self.id }),
        }
    }

    async fn connect(&self, dtls_parameters: Value) -> EngineResult<()> {
        let remote = WebRtcTransportRemoteParameters {
            dtls_parameters: from_json(dtls_parameters)?,
        };
        self.handle()?.connect(remote).await.map_err(request_failed)
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> EngineResult<Arc<dyn Producer>> {
        let parameters: RtpParameters = from_json(rtp_parameters)?;
        let producer = self
            .handle()?
            .produce(ProducerOptions::new(rtp_kind(kind), parameters))
            .await
            .map_err(request_failed)?;

        Ok(Arc::new(MediasoupProducer {
            id: producer.id().to_string(),
            kind,
            inner: Mutex::new(Some(producer)),
        }))
    }

    async fn consume(&self, request: ConsumeRequest) -> EngineResult<Arc<dyn Consumer>> {
        let transport = self.handle()?;
        consume_on(&transport, request).await
    }

    fn close(&self) -> EngineResult<()> {
        drop(self.inner.lock().take());
        Ok(())
    }
}

struct MediasoupPlainTransport {
    id: String,
    inner: Mutex<Option<PlainHandle>>,
}

impl MediasoupPlainTransport {
    fn handle(&self) -> EngineResult<PlainHandle> {
        self.inner.lock().clone().ok_or(EngineError::Closed)
    }
}

#[async_trait]
impl PlainTransport for MediasoupPlainTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connect(&self, remote: ForwardEndpoint) -> EngineResult<()> {
        let params = PlainTransportRemoteParameters {
            ip: Some(remote.ip),
            port: Some(remote.rtp_port),
            rtcp_port: remote.rtcp_port,
            srtp_parameters: None,
        };
        self.handle()?.connect(params).await.map_err(request_failed)
    }

    async fn consume(&self, request: ConsumeRequest) -> EngineResult<Arc<dyn Consumer>> {
        let transport = self.handle()?;
        consume_on(&transport, request).await
    }

    fn close(&self) -> EngineResult<()> {
        drop(self.inner.lock().take());
        Ok(())
    }
}

async fn consume_on<T: Transport>(
    transport: &T,
    request: ConsumeRequest,
) -> EngineResult<Arc<dyn Consumer>> {
    let producer_id = parse_producer_id(&request.producer_id)?;
    let caps: RtpCapabilities = from_json(request.rtp_capabilities)?;

    let mut options = ConsumerOptions::new(producer_id, caps);
    options.paused = request.paused;

    let consumer = transport.consume(options).await.map_err(request_failed)?;

    Ok(Arc::new(MediasoupConsumer {
        id: consumer.id().to_string(),
        producer_id: request.producer_id,
        kind: media_kind(consumer.kind()),
        rtp_parameters: to_json(consumer.rtp_parameters()),
        consumer_type: to_json(&consumer.r#type())
            .as_str()
            .unwrap_or("simple")
            .to_string(),
        inner: Mutex::new(Some(consumer)),
    }))
}

struct MediasoupProducer {
    id: String,
    kind: MediaKind,
    inner: Mutex<Option<mediasoup::producer::Producer>>,
}

impl Producer for MediasoupProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) -> EngineResult<()> {
        drop(self.inner.lock().take());
        Ok(())
    }
}

struct MediasoupConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: Value,
    consumer_type: String,
    inner: Mutex<Option<mediasoup::consumer::Consumer>>,
}

#[async_trait]
impl Consumer for MediasoupConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn producer_id(&self) -> String {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> Value {
        self.rtp_parameters.clone()
    }

    fn consumer_type(&self) -> String {
        self.consumer_type.clone()
    }

    fn paused(&self) -> bool {
        self.inner.lock().as_ref().map_or(true, |c| c.paused())
    }

    async fn resume(&self) -> EngineResult<()> {
        let consumer = self.inner.lock().clone().ok_or(EngineError::Closed)?;
        consumer.resume().await.map_err(request_failed)
    }

    fn close(&self) -> EngineResult<()> {
        drop(self.inner.lock().take());
        Ok(())
    }
}
