//! HTTP/WebSocket server
//!
//! Routes:
//!
//! - `GET /api/streams` → live playlist names
//! - `GET /hls/*` → files from the output directory
//! - `GET /ws` → signaling WebSocket
//! - `GET /health` → counters

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::liveness::LivenessSet;
use crate::registry::Frame;
use crate::server::config::ServerConfig;
use crate::server::http::{HealthResponse, StreamsResponse};
use crate::signaling::Broker;

/// Shared state for route handlers
#[derive(Clone)]
struct AppState {
    broker: Arc<Broker>,
    liveness: LivenessSet,
    start_time: Instant,
    outbound_capacity: usize,
    shutdown: CancellationToken,
}

/// Signaling and HLS server
pub struct SignalingServer {
    config: ServerConfig,
    broker: Arc<Broker>,
    liveness: LivenessSet,
    start_time: Instant,
    shutdown: CancellationToken,
}

impl SignalingServer {
    /// Create a server over a broker and a liveness set
    pub fn new(config: ServerConfig, broker: Arc<Broker>, liveness: LivenessSet) -> Self {
        Self {
            config,
            broker,
            liveness,
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get a reference to the broker
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let state = AppState {
            broker: Arc::clone(&self.broker),
            liveness: self.liveness.clone(),
            start_time: self.start_time,
            outbound_capacity: self.config.outbound_capacity,
            shutdown: self.shutdown.clone(),
        };

        Router::new()
            .route("/api/streams", get(streams_handler))
            .route("/health", get(health_handler))
            .route(&self.config.ws_path, get(ws_handler))
            .nest_service("/hls", ServeDir::new(&self.config.output_dir))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    ///
    /// Open WebSocket connections are closed once `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, ws_path = %self.config.ws_path, "Server listening");

        let token = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
                token.cancel();
            })
            .await?;

        Ok(())
    }
}

/// GET /api/streams
async fn streams_handler(State(state): State<AppState>) -> Json<StreamsResponse> {
    Json(StreamsResponse::from_set(&state.liveness))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.broker.registry();
    let (transcode_jobs, bridge_failures) = match state.broker.bridge() {
        Some(bridge) => (
            bridge.supervisor().job_count().await,
            bridge.stats().failures(),
        ),
        None => (0, 0),
    };

    Json(HealthResponse::new(
        state.start_time,
        registry.connection_count().await,
        registry.producer_count().await,
        transcode_jobs,
        bridge_failures,
    ))
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one signaling connection
///
/// Frames are dispatched one at a time in arrival order. A writer task drains
/// the outbound queue into the socket.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Frame>(state.outbound_capacity);
    let id = state.broker.open_connection(tx).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.broker.handle_text(id, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Binary frames are not part of the protocol; ping/pong is
                // answered by axum
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection_id = id, error = %e, "WebSocket read error");
                    break;
                }
            }
        }
    }

    // Dropping the registry entry drops the outbound sender, which ends
    // the writer
    state.broker.close_connection(id).await;
    drop(writer);
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::TransportConfig;
    use crate::testutil::FakeEngine;

    fn server(output_dir: &std::path::Path, liveness: LivenessSet) -> SignalingServer {
        let engine = FakeEngine::new();
        let broker = Arc::new(Broker::new(engine, &TransportConfig::default()));
        let config = ServerConfig::default().output_dir(output_dir);
        SignalingServer::new(config, broker, liveness)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_streams_offline_then_live() {
        let dir = tempfile::tempdir().unwrap();
        let liveness = LivenessSet::new();
        let server = server(dir.path(), liveness.clone());

        let (status, body) = get_json(server.router(), "/api/streams").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "offline"}));

        liveness.insert("stream1.m3u8");
        let (_, body) = get_json(server.router(), "/api/streams").await;
        assert_eq!(body, json!({"status": "live", "streams": ["stream1.m3u8"]}));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path(), LivenessSet::new());

        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["transcode_jobs"], 0);
        assert_eq!(body["bridge_failures"], 0);
    }

    #[tokio::test]
    async fn test_hls_static_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stream1.m3u8"), "#EXTM3U\n").unwrap();
        let server = server(dir.path(), LivenessSet::new());

        let req = Request::builder()
            .uri("/hls/stream1.m3u8")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert_eq!(&body[..], b"#EXTM3U\n");

        let req = Request::builder()
            .uri("/hls/stream9.m3u8")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path(), LivenessSet::new());

        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    async fn recv_text<S>(ws: &mut S) -> Value
    where
        S: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for message")
                .expect("socket closed")
                .expect("socket error");
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_signaling_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(server(dir.path(), LivenessSet::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            running
                .serve(listener, async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let url = format!("ws://{}/ws", addr);
        let (mut a, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        // B must be registered before A produces
        b.send(WsMessage::Text(json!({"type": "getRouterRtpCapabilities"}).to_string().into()))
            .await
            .unwrap();
        assert_eq!(recv_text(&mut b).await["type"], "routerCapabilities");

        a.send(WsMessage::Text(json!({"type": "createProducerTransport"}).to_string().into()))
            .await
            .unwrap();
        assert_eq!(recv_text(&mut a).await["type"], "producerTransportCreated");

        let produce = json!({"type": "produce", "kind": "video", "rtpParameters": {}});
        a.send(WsMessage::Text(produce.to_string().into())).await.unwrap();
        assert_eq!(recv_text(&mut a).await["type"], "produced");
        assert_eq!(
            recv_text(&mut b).await,
            json!({"type": "newProducer", "data": "new user"})
        );

        // Closing A removes its producer
        a.close(None).await.unwrap();
        for _ in 0..100 {
            if server.broker().registry().connection_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(server.broker().registry().connection_count().await, 1);
        assert_eq!(server.broker().registry().producer_count().await, 0);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not shut down")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_stops_when_token_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(server(dir.path(), LivenessSet::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let dead = CancellationToken::new();
        let signal = dead.clone();
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            running
                .serve(listener, async move { signal.cancelled().await })
                .await
        });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();
        ws.send(WsMessage::Text(json!({"type": "getRouterRtpCapabilities"}).to_string().into()))
            .await
            .unwrap();
        assert_eq!(recv_text(&mut ws).await["type"], "routerCapabilities");

        // An open signaling connection does not hold the server up
        dead.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not shut down")
            .unwrap()
            .unwrap();
        for _ in 0..100 {
            if server.broker().registry().connection_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(server.broker().registry().connection_count().await, 0);
    }
}
