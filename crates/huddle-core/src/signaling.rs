//! Signaling channel contract and the typed request layer on top of it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::SessionError;
use crate::protocol::{
    request, ChatMessage, CloseProducerRequest, ConsumeMedia, ConsumeMediaRequest, DtlsParameters,
    GetAllPeers, JoinRoom, JoinRoomRequest, PeerConfig, PeerMessageReply, PinPeerConfig,
    PushEvent, Response, ResumeConsumerRequest, RtpCapabilities, Status, StatusReply,
    TransportConnectRequest, TransportOptions, TransportProduceRequest, TransportProduced,
};

/// Bidirectional link to the session-routing server.
///
/// Implementations own the socket. A transport-level failure must be
/// reported as an error envelope rather than dropped, so that every
/// request resolves.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn request(&self, event: &'static str, payload: Value) -> Response<Value>;

    /// Open a new stream of server pushes. Dropping the receiver detaches it.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PushEvent>;
}

/// Typed wrapper issuing the requests the session needs.
#[derive(Clone)]
pub struct Signaling {
    channel: Arc<dyn SignalingChannel>,
}

impl Signaling {
    pub fn new(channel: Arc<dyn SignalingChannel>) -> Self {
        Self { channel }
    }

    async fn call<Req, Res>(&self, event: &'static str, req: &Req) -> Result<Res, SessionError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload = serde_json::to_value(req)?;
        tracing::debug!(event, "signaling request");
        let result = self.channel.request(event, payload).await.decode(event);
        if let Err(e) = &result {
            tracing::debug!(event, "signaling request failed: {e}");
        }
        result
    }

    /// Like `call`, for replies that carry only a status. An `error` status
    /// is a failure even though the envelope has data.
    async fn acknowledged<Req>(&self, event: &'static str, req: &Req) -> Result<StatusReply, SessionError>
    where
        Req: Serialize + ?Sized,
    {
        let reply: StatusReply = self.call(event, req).await?;
        ensure_success(event, reply.status)?;
        Ok(reply)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PushEvent> {
        self.channel.subscribe()
    }

    pub async fn join_room(&self, req: &JoinRoomRequest) -> Result<JoinRoom, SessionError> {
        let joined: JoinRoom = self.call(request::JOIN_ROOM, req).await?;
        ensure_success(request::JOIN_ROOM, joined.status)?;
        Ok(joined)
    }

    pub async fn get_router_rtp_capabilities(&self) -> Result<RtpCapabilities, SessionError> {
        self.call(request::GET_ROUTER_RTP_CAPABILITIES, &Value::Null).await
    }

    pub async fn create_web_rtc_transport(&self) -> Result<TransportOptions, SessionError> {
        self.call(request::CREATE_WEB_RTC_TRANSPORT, &Value::Null).await
    }

    pub async fn transport_connect(
        &self,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> Result<StatusReply, SessionError> {
        let req = TransportConnectRequest {
            transport_id: transport_id.to_string(),
            dtls_parameters,
        };
        self.acknowledged(request::TRANSPORT_CONNECT, &req).await
    }

    pub async fn transport_produce(
        &self,
        req: &TransportProduceRequest,
    ) -> Result<TransportProduced, SessionError> {
        self.call(request::TRANSPORT_PRODUCE, req).await
    }

    pub async fn consume_media(&self, req: &ConsumeMediaRequest) -> Result<ConsumeMedia, SessionError> {
        self.call(request::CONSUME_MEDIA, req).await
    }

    pub async fn resume_consumer(&self, consumer_id: &str) -> Result<StatusReply, SessionError> {
        let req = ResumeConsumerRequest {
            server_consumer_id: consumer_id.to_string(),
        };
        self.acknowledged(request::RESUME_CONSUMER, &req).await
    }

    pub async fn get_all_peers(&self) -> Result<GetAllPeers, SessionError> {
        self.call(request::GET_ALL_PEERS, &Value::Null).await
    }

    pub async fn close_producer(&self, producer_id: &str) -> Result<StatusReply, SessionError> {
        let req = CloseProducerRequest {
            producer_id: producer_id.to_string(),
        };
        self.acknowledged(request::CLOSE_PRODUCER, &req).await
    }

    pub async fn peer_config(&self, config: &PeerConfig) -> Result<StatusReply, SessionError> {
        self.acknowledged(request::PEER_CONFIG, config).await
    }

    pub async fn pin_peer(&self, pin: &PinPeerConfig) -> Result<StatusReply, SessionError> {
        self.acknowledged(request::PIN_PEER, pin).await
    }

    pub async fn peer_message(&self, message: &ChatMessage) -> Result<PeerMessageReply, SessionError> {
        let reply: PeerMessageReply = self.call(request::PEER_MESSAGE, message).await?;
        ensure_success(request::PEER_MESSAGE, reply.status)?;
        Ok(reply)
    }
}

fn ensure_success(event: &'static str, status: Status) -> Result<(), SessionError> {
    match status {
        Status::Success => Ok(()),
        Status::Error => Err(SessionError::Signaling {
            event,
            reason: "server replied with error status".to_string(),
        }),
    }
}
