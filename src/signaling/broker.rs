//! Signaling broker
//!
//! Dispatches each connection's requests against its leg state. A handler is
//! a sequence of short critical sections on the registry separated by engine
//! awaits; state is re-validated after every await since another request
//! (or a close) may have run in between.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use super::error::SignalingError;
use super::message::{self, ClientMessage, Parsed, ProducerId, Reply, Subscribed};
use crate::bridge::{ForwardRequest, TranscodingBridge};
use crate::engine::{
    ConsumeRequest, MediaEngine, MediaKind, TransportConfig, TransportFactory, WebRtcTransport,
};
use crate::registry::entry::log_close_failure;
use crate::registry::{ConnectionId, ConsumerLeg, Frame, ProducerLeg, ProducerRecord, SessionRegistry};

/// Handler outcome
enum Dispatched {
    /// Reply to the requesting connection only
    Reply(Reply),
    /// A producer was created; notify others and start forwarding
    Produced {
        reply: Reply,
        forward: ForwardRequest,
    },
}

/// Broker context shared by every connection
///
/// Holds the session registry, the producer directory (inside the registry)
/// and the optional transcoding bridge.
pub struct Broker {
    engine: Arc<dyn MediaEngine>,
    transports: TransportFactory,
    registry: SessionRegistry,
    bridge: Option<Arc<TranscodingBridge>>,
    next_connection_id: AtomicU64,
}

impl Broker {
    /// Create a broker without a transcoding bridge
    pub fn new(engine: Arc<dyn MediaEngine>, config: &TransportConfig) -> Self {
        Self {
            transports: TransportFactory::new(Arc::clone(&engine), config),
            engine,
            registry: SessionRegistry::new(),
            bridge: None,
            next_connection_id: AtomicU64::new(0),
        }
    }

    /// Forward every new producer through the bridge
    pub fn with_bridge(mut self, bridge: Arc<TranscodingBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Transcoding bridge, if configured
    pub fn bridge(&self) -> Option<&Arc<TranscodingBridge>> {
        self.bridge.as_ref()
    }

    /// Register a new connection and return its id
    pub async fn open_connection(&self, outbound: mpsc::Sender<Frame>) -> ConnectionId {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.registry.open(id, outbound).await;
        tracing::info!(connection_id = id, "Connection opened");
        id
    }

    /// Release a connection and everything it owns
    ///
    /// Transcode jobs started for its producer keep running.
    pub async fn close_connection(&self, id: ConnectionId) {
        if let Some(record) = self.registry.close(id).await {
            tracing::info!(
                connection_id = id,
                producer_id = %record.producer_id,
                "Producer removed from directory"
            );
        }
    }

    /// Handle one inbound text frame
    ///
    /// Unknown and malformed frames are dropped. Handler failures become an
    /// `error` reply to this connection only.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        let request = match Parsed::from_text(text) {
            Parsed::Message(request) => request,
            Parsed::Unknown(kind) => {
                tracing::debug!(connection_id = id, kind = %kind, "Ignoring unknown request");
                return;
            }
            Parsed::Malformed(reason) => {
                tracing::debug!(connection_id = id, reason = %reason, "Ignoring malformed frame");
                return;
            }
        };

        match self.dispatch(id, request).await {
            Ok(Dispatched::Reply(reply)) => {
                self.reply(id, reply).await;
            }
            Ok(Dispatched::Produced { reply, forward }) => {
                self.reply(id, reply).await;

                let notice = Reply::new(message::NEW_PRODUCER, "new user").to_frame();
                let notified = self.registry.broadcast_except(id, notice).await;
                tracing::debug!(connection_id = id, notified = notified, "New producer announced");

                if let Some(bridge) = &self.bridge {
                    let _ = bridge.spawn_forward(forward);
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = id, error = %e, "Request failed");
                self.reply(id, Reply::error(&e)).await;
            }
        }
    }

    async fn reply(&self, id: ConnectionId, reply: Reply) {
        if !self.registry.send_to(id, reply.to_frame()).await {
            tracing::debug!(connection_id = id, kind = reply.kind, "Reply dropped");
        }
    }

    async fn dispatch(
        &self,
        id: ConnectionId,
        request: ClientMessage,
    ) -> Result<Dispatched, SignalingError> {
        let reply = match request {
            ClientMessage::GetRouterRtpCapabilities => {
                Reply::new(message::ROUTER_CAPABILITIES, self.engine.rtp_capabilities())
            }
            ClientMessage::CreateProducerTransport => self.create_producer_transport(id).await?,
            ClientMessage::ConnectProducerTransport { dtls_parameters } => {
                self.connect_producer_transport(id, dtls_parameters).await?
            }
            ClientMessage::Produce {
                kind,
                rtp_parameters,
            } => return self.produce(id, kind, rtp_parameters).await,
            ClientMessage::CloseProducer => self.close_producer(id).await?,
            ClientMessage::CreateConsumerTransport => self.create_consumer_transport(id).await?,
            ClientMessage::ConnectConsumerTransport { dtls_parameters } => {
                self.connect_consumer_transport(id, dtls_parameters).await?
            }
            ClientMessage::Consume { rtp_capabilities } => {
                self.consume(id, rtp_capabilities).await?
            }
            ClientMessage::Resume => self.resume(id).await?,
        };

        Ok(Dispatched::Reply(reply))
    }

    async fn create_producer_transport(&self, id: ConnectionId) -> Result<Reply, SignalingError> {
        if self.registry.read(id, |c, _| c.producer.is_producing()).await? {
            return Err(SignalingError::AlreadyProducing);
        }

        let transport = self.transports.create().await?;
        let params = transport.parameters();

        match self
            .registry
            .update(id, |c, _| c.producer.set_transport(Arc::clone(&transport)))
            .await
        {
            Ok(Ok(previous)) => {
                if let Some(previous) = previous {
                    log_close_failure(id, "producer transport", previous.close());
                }
            }
            Ok(Err(rejected)) => {
                log_close_failure(id, "producer transport", rejected.close());
                return Err(SignalingError::AlreadyProducing);
            }
            Err(e) => {
                log_close_failure(id, "producer transport", transport.close());
                return Err(e.into());
            }
        }

        tracing::debug!(connection_id = id, transport_id = %transport.id(), "Producer transport ready");
        Ok(Reply::new(message::PRODUCER_TRANSPORT_CREATED, params))
    }

    async fn connect_producer_transport(
        &self,
        id: ConnectionId,
        dtls_parameters: Value,
    ) -> Result<Reply, SignalingError> {
        let transport = self
            .registry
            .read(id, |c, _| c.producer.transport().cloned())
            .await?
            .ok_or(SignalingError::ProducerTransportMissing)?;

        transport.connect(dtls_parameters).await?;
        Ok(Reply::new(message::PRODUCER_CONNECTED, "producer connected!"))
    }

    async fn produce(
        &self,
        id: ConnectionId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<Dispatched, SignalingError> {
        let transport = self
            .registry
            .read(id, |c, _| match &c.producer {
                ProducerLeg::Idle => Err(SignalingError::ProducerTransportMissing),
                ProducerLeg::TransportReady { transport } => Ok(Arc::clone(transport)),
                ProducerLeg::Producing { .. } => Err(SignalingError::AlreadyProducing),
            })
            .await??;

        let producer = transport.produce(kind, rtp_parameters).await?;
        let producer_id = producer.id();
        let transport_id = transport.id();

        let appended = self
            .registry
            .update(id, |c, directory| {
                if c.producer.transport().map(|t| t.id()) != Some(transport_id) {
                    return Err(SignalingError::ProducerTransportReplaced);
                }
                if c.producer.start_producing(Arc::clone(&producer)).is_err() {
                    return Err(SignalingError::AlreadyProducing);
                }
                let record = ProducerRecord {
                    connection_id: id,
                    producer_id: producer_id.clone(),
                    kind,
                };
                directory.append(record).map_err(|e| {
                    let _ = c.producer.stop_producing();
                    SignalingError::from(e)
                })
            })
            .await
            .map_err(SignalingError::from)
            .and_then(|result| result);

        let size = match appended {
            Ok(size) => size,
            Err(e) => {
                log_close_failure(id, "producer", producer.close());
                return Err(e);
            }
        };

        let stream_name = format!("stream{}", size);
        tracing::info!(
            connection_id = id,
            producer_id = %producer_id,
            kind = %kind,
            stream = %stream_name,
            producers = size,
            "Producer created"
        );

        Ok(Dispatched::Produced {
            reply: Reply::new(
                message::PRODUCED,
                ProducerId {
                    id: producer_id.clone(),
                },
            ),
            forward: ForwardRequest {
                stream_name,
                producer_id,
                kind,
            },
        })
    }

    async fn close_producer(&self, id: ConnectionId) -> Result<Reply, SignalingError> {
        let producer = self
            .registry
            .update(id, |c, directory| {
                let producer = c.producer.stop_producing()?;
                let _ = directory.remove_by_connection(id);
                Some(producer)
            })
            .await?
            .ok_or(SignalingError::NotProducing)?;

        let producer_id = producer.id();
        log_close_failure(id, "producer", producer.close());
        tracing::info!(connection_id = id, producer_id = %producer_id, "Producer closed");

        Ok(Reply::new(message::PRODUCER_CLOSED, ProducerId { id: producer_id }))
    }

    async fn create_consumer_transport(&self, id: ConnectionId) -> Result<Reply, SignalingError> {
        // Fail fast before allocating engine resources
        self.registry.read(id, |_, _| ()).await?;

        let transport = self.transports.create().await?;
        let params = transport.parameters();

        match self
            .registry
            .update(id, |c, _| c.consumer.replace_transport(Arc::clone(&transport)))
            .await
        {
            Ok(previous) => previous.close(id),
            Err(e) => {
                log_close_failure(id, "consumer transport", transport.close());
                return Err(e.into());
            }
        }

        tracing::debug!(connection_id = id, transport_id = %transport.id(), "Consumer transport ready");
        Ok(Reply::new(message::SUB_TRANSPORT_CREATED, params))
    }

    async fn connect_consumer_transport(
        &self,
        id: ConnectionId,
        dtls_parameters: Value,
    ) -> Result<Reply, SignalingError> {
        let transport = self
            .registry
            .read(id, |c, _| c.consumer.transport().cloned())
            .await?
            .ok_or(SignalingError::ConsumerTransportMissing)?;

        transport.connect(dtls_parameters).await?;
        Ok(Reply::new(message::SUB_CONNECTED, "consumer transport connected"))
    }

    async fn consume(
        &self,
        id: ConnectionId,
        rtp_capabilities: Value,
    ) -> Result<Reply, SignalingError> {
        let (transport, selected) = self
            .registry
            .read(id, |c, directory| {
                let transport: Arc<dyn WebRtcTransport> = c
                    .consumer
                    .transport()
                    .cloned()
                    .ok_or(SignalingError::ConsumerTransportMissing)?;
                let selected = directory
                    .find_first_not_owned_by(id)
                    .cloned()
                    .ok_or(SignalingError::NoEligibleProducer)?;
                Ok::<_, SignalingError>((transport, selected))
            })
            .await??;

        if !self
            .engine
            .can_consume(&selected.producer_id, &rtp_capabilities)
        {
            return Err(SignalingError::CannotConsume);
        }

        let consumer = transport
            .consume(ConsumeRequest {
                producer_id: selected.producer_id.clone(),
                rtp_capabilities,
                paused: selected.kind == MediaKind::Video,
            })
            .await
            .map_err(SignalingError::ConsumeFailed)?;

        let transport_id = transport.id();
        let installed = self
            .registry
            .update(id, |c, _| {
                if c.consumer.transport().map(|t| t.id()) != Some(transport_id) {
                    return Err(SignalingError::ConsumerTransportReplaced);
                }
                c.consumer
                    .start_consuming(Arc::clone(&consumer))
                    .map_err(|_| SignalingError::ConsumerTransportMissing)
            })
            .await
            .map_err(SignalingError::from)
            .and_then(|result| result);

        match installed {
            Ok(Some(previous)) => log_close_failure(id, "consumer", previous.close()),
            Ok(None) => {}
            Err(e) => {
                log_close_failure(id, "consumer", consumer.close());
                return Err(e);
            }
        }

        tracing::info!(
            connection_id = id,
            producer_id = %selected.producer_id,
            consumer_id = %consumer.id(),
            owner = selected.connection_id,
            "Consumer created"
        );

        Ok(Reply::new(
            message::SUBSCRIBED,
            Subscribed {
                producer_id: selected.producer_id,
                id: consumer.id(),
                kind: consumer.kind(),
                rtp_parameters: consumer.rtp_parameters(),
                consumer_type: consumer.consumer_type(),
                producer_paused: consumer.paused(),
            },
        ))
    }

    async fn resume(&self, id: ConnectionId) -> Result<Reply, SignalingError> {
        let consumer = self
            .registry
            .read(id, |c, _| match &c.consumer {
                ConsumerLeg::Consuming { consumer, .. } => Some(Arc::clone(consumer)),
                _ => None,
            })
            .await?
            .ok_or(SignalingError::NoConsumer)?;

        consumer.resume().await?;
        Ok(Reply::new(message::RESUMED, "resumed"))
    }
}
