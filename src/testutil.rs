//! Scripted media engine and helpers shared by unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::engine::{
    ConsumeRequest, Consumer, EngineError, EngineResult, ForwardEndpoint, MediaEngine, MediaKind,
    PlainTransport, PlainTransportOptions, Producer, RtpCodec, WebRtcTransport,
    WebRtcTransportOptions,
};
use crate::registry::Frame;

#[derive(Default)]
struct Shared {
    next_id: AtomicU64,
    closed: Mutex<Vec<String>>,
    producers: Mutex<HashMap<String, MediaKind>>,
    plain_connects: Mutex<Vec<ForwardEndpoint>>,
    fail_consume: AtomicBool,
}

impl Shared {
    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn close(&self, flag: &AtomicBool, id: &str) -> EngineResult<()> {
        if !flag.swap(true, Ordering::SeqCst) {
            self.closed.lock().push(id.to_string());
        }
        Ok(())
    }
}

/// In-memory engine with scriptable failures
pub(crate) struct FakeEngine {
    shared: Arc<Shared>,
    can_consume: AtomicBool,
    fail_transports: AtomicBool,
    webrtc_created: AtomicUsize,
    plain_created: AtomicUsize,
}

impl FakeEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared::default()),
            can_consume: AtomicBool::new(true),
            fail_transports: AtomicBool::new(false),
            webrtc_created: AtomicUsize::new(0),
            plain_created: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_can_consume(&self, value: bool) {
        self.can_consume.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_transports(&self, value: bool) {
        self.fail_transports.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_consume(&self, value: bool) {
        self.shared.fail_consume.store(value, Ordering::SeqCst);
    }

    pub(crate) fn webrtc_transports_created(&self) -> usize {
        self.webrtc_created.load(Ordering::SeqCst)
    }

    pub(crate) fn plain_transports_created(&self) -> usize {
        self.plain_created.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> Vec<String> {
        self.shared.closed.lock().clone()
    }

    pub(crate) fn is_closed(&self, id: &str) -> bool {
        self.shared.closed.lock().iter().any(|c| c == id)
    }

    pub(crate) fn plain_connects(&self) -> Vec<ForwardEndpoint> {
        self.shared.plain_connects.lock().clone()
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    fn rtp_capabilities(&self) -> Value {
        json!({
            "codecs": [
                {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2},
                {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000}
            ],
            "headerExtensions": []
        })
    }

    fn can_consume(&self, producer_id: &str, _rtp_capabilities: &Value) -> bool {
        self.can_consume.load(Ordering::SeqCst)
            && self.shared.producers.lock().contains_key(producer_id)
    }

    async fn create_webrtc_transport(
        &self,
        _options: &WebRtcTransportOptions,
    ) -> EngineResult<Arc<dyn WebRtcTransport>> {
        if self.fail_transports.load(Ordering::SeqCst) {
            return Err(EngineError::Request("no ports available".into()));
        }
        let _ = self.webrtc_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeWebRtcTransport {
            id: self.shared.next_id("transport"),
            closed: AtomicBool::new(false),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn create_plain_transport(
        &self,
        _options: &PlainTransportOptions,
    ) -> EngineResult<Arc<dyn PlainTransport>> {
        if self.fail_transports.load(Ordering::SeqCst) {
            return Err(EngineError::Request("no ports available".into()));
        }
        let _ = self.plain_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePlainTransport {
            id: self.shared.next_id("plain"),
            closed: AtomicBool::new(false),
            shared: Arc::clone(&self.shared),
        }))
    }
}

fn consume_with(shared: &Arc<Shared>, request: ConsumeRequest) -> EngineResult<Arc<dyn Consumer>> {
    if shared.fail_consume.load(Ordering::SeqCst) {
        return Err(EngineError::Request("consume rejected".into()));
    }
    let kind = shared
        .producers
        .lock()
        .get(&request.producer_id)
        .copied()
        .ok_or_else(|| EngineError::Request("unknown producer".into()))?;

    Ok(Arc::new(FakeConsumer {
        id: shared.next_id("consumer"),
        producer_id: request.producer_id,
        kind,
        paused: AtomicBool::new(request.paused),
        closed: AtomicBool::new(false),
        shared: Arc::clone(shared),
    }))
}

struct FakeWebRtcTransport {
    id: String,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

#[async_trait]
impl WebRtcTransport for FakeWebRtcTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn parameters(&self) -> Value {
        json!({
            "id": self.id,
            "iceParameters": {"usernameFragment": "frag", "password": "secret"},
            "iceCandidates": [],
            "dtlsParameters": {"role": "auto", "fingerprints": []}
        })
    }

    async fn connect(&self, dtls_parameters: Value) -> EngineResult<()> {
        if !dtls_parameters.is_object() {
            return Err(EngineError::InvalidParameters("dtlsParameters".into()));
        }
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        _rtp_parameters: Value,
    ) -> EngineResult<Arc<dyn Producer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let id = self.shared.next_id("producer");
        let _ = self.shared.producers.lock().insert(id.clone(), kind);
        Ok(Arc::new(FakeProducer {
            id,
            kind,
            closed: AtomicBool::new(false),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn consume(&self, request: ConsumeRequest) -> EngineResult<Arc<dyn Consumer>> {
        consume_with(&self.shared, request)
    }

    fn close(&self) -> EngineResult<()> {
        self.shared.close(&self.closed, &self.id)
    }
}

struct FakePlainTransport {
    id: String,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

#[async_trait]
impl PlainTransport for FakePlainTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connect(&self, remote: ForwardEndpoint) -> EngineResult<()> {
        self.shared.plain_connects.lock().push(remote);
        Ok(())
    }

    async fn consume(&self, request: ConsumeRequest) -> EngineResult<Arc<dyn Consumer>> {
        consume_with(&self.shared, request)
    }

    fn close(&self) -> EngineResult<()> {
        self.shared.close(&self.closed, &self.id)
    }
}

struct FakeProducer {
    id: String,
    kind: MediaKind,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

impl Producer for FakeProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) -> EngineResult<()> {
        let _ = self.shared.producers.lock().remove(&self.id);
        self.shared.close(&self.closed, &self.id)
    }
}

struct FakeConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    paused: AtomicBool,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

#[async_trait]
impl Consumer for FakeConsumer {
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
        let codec = RtpCodec::default_for(self.kind);
        json!({
            "codecs": [{
                "mimeType": codec.mime_type,
                "payloadType": codec.payload_type + 4,
                "clockRate": codec.clock_rate,
                "channels": codec.channels,
            }],
            "encodings": [{"ssrc": 1111}]
        })
    }

    fn consumer_type(&self) -> String {
        "simple".into()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> EngineResult<()> {
        self.shared.close(&self.closed, &self.id)
    }
}

/// Receive the next outbound frame as JSON, failing the test after 2s
pub(crate) async fn recv_json(rx: &mut mpsc::Receiver<Frame>) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("outbound channel closed");
    serde_json::from_str(&frame).expect("frame is not JSON")
}

/// Assert that no frame is queued
pub(crate) fn assert_no_frame(rx: &mut mpsc::Receiver<Frame>) {
    if let Ok(frame) = rx.try_recv() {
        panic!("unexpected frame: {frame}");
    }
}

/// Executable that ignores its arguments and keeps running
#[cfg(unix)]
pub(crate) fn long_running_program(dir: &std::path::Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
