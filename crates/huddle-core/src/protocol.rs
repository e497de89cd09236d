//! Wire contract shared with the session-routing server.
//!
//! Field names follow the server's camelCase JSON. Negotiation blobs (RTP
//! capabilities, DTLS/ICE parameters) are opaque here and passed through
//! to the [`MediaEngine`](crate::media::MediaEngine) untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SessionError;
use crate::media::MediaTrack;

pub type RtpCapabilities = Value;
pub type RtpParameters = Value;
pub type DtlsParameters = Value;

pub type ProducerId = String;
pub type ConsumerId = String;
pub type TransportId = String;

/// Request/response event names.
pub mod request {
    pub const JOIN_ROOM: &str = "join-room";
    pub const GET_ROUTER_RTP_CAPABILITIES: &str = "get-router-rtp-capabilities";
    pub const CREATE_WEB_RTC_TRANSPORT: &str = "create-web-rtc-transport";
    pub const TRANSPORT_CONNECT: &str = "transport-connect";
    pub const TRANSPORT_PRODUCE: &str = "transport-produce";
    pub const CONSUME_MEDIA: &str = "consume-media";
    pub const RESUME_CONSUMER: &str = "resume-consumer";
    pub const GET_ALL_PEERS: &str = "get-all-peers";
    pub const CLOSE_PRODUCER: &str = "close-producer";
    pub const PEER_CONFIG: &str = "peer-config";
    pub const PIN_PEER: &str = "pin-peer";
    pub const PEER_MESSAGE: &str = "peer-message";
}

/// Server push event names.
pub mod push {
    pub const NEW_PRODUCER: &str = "new-producer";
    pub const PRODUCER_CLOSED: &str = "producer-closed";
    pub const PEER_CONFIG: &str = "peer-config";
    pub const PEER_MESSAGE: &str = "peer-message";
    pub const PEER_LEFT: &str = "peer-left";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Screen,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Clap,
    Love,
    Celebrate,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Per-participant flags, replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerConfig {
    pub user_id: String,
    pub is_muted: bool,
    pub is_video_on: bool,
    pub is_pinned: bool,
    pub is_sharing_screen: bool,
    pub has_raised_hand: bool,
    pub reaction: Reaction,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            is_muted: false,
            is_video_on: true,
            is_pinned: false,
            is_sharing_screen: false,
            has_raised_hand: false,
            reaction: Reaction::None,
        }
    }
}

impl PeerConfig {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// A producer as listed in a peer snapshot.
///
/// `track` is never on the wire: it is filled locally once the producer has
/// been consumed (remote peers) or produced (self).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    #[serde(default)]
    pub user_id: String,
    #[serde(skip)]
    pub track: Option<MediaTrack>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportRef {
    pub transport_id: TransportId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRef {
    pub consumer_id: ConsumerId,
}

/// Full snapshot of a participant. A `new-producer` push always carries the
/// complete current producer list, never a delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerInfo {
    pub peer_id: String,
    pub user_id: String,
    pub room_id: String,
    pub room_name: String,
    pub display_name: String,
    pub device: String,
    pub peer_config: PeerConfig,
    pub rtp_capabilities: RtpCapabilities,
    pub transports: Vec<TransportRef>,
    pub producers: Vec<ProducerInfo>,
    pub consumers: Vec<ConsumerRef>,
}

impl PeerInfo {
    pub fn is_pinned(&self) -> bool {
        self.peer_config.is_pinned
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: String,
    pub room_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinerInfo {
    pub user_id: String,
    pub display_name: String,
    pub device: String,
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_info: RoomInfo,
    pub peer_info: JoinerInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub peer_id: String,
    pub room_id: String,
    pub room_name: String,
    pub status: Status,
}

/// Parameters of a server-side WebRTC transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: TransportId,
    #[serde(default)]
    pub ice_parameters: Value,
    #[serde(default)]
    pub ice_candidates: Vec<Value>,
    #[serde(default)]
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConnectRequest {
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppData {
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportProduceRequest {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_data: AppData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportProduced {
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeMediaRequest {
    pub remote_producer_id: ProducerId,
    pub consumer_transport_id: TransportId,
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeMedia {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    #[serde(default)]
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumerRequest {
    pub server_consumer_id: ConsumerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseProducerRequest {
    pub producer_id: ProducerId,
}

/// Acknowledgement used by several requests that carry no other data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: Status,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetAllPeers {
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinPeerConfig {
    pub user_id: String,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub user_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "message")]
    pub text: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMessageReply {
    pub peer_message: ChatMessage,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProducer {
    pub peer: PeerInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerClosed {
    pub producer_id: ProducerId,
}

/// Push payloads are wrapped as `{ "request": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PushEnvelope<T> {
    request: T,
}

/// Reply envelope: either `data` or `error`.
///
/// A missing `data` is a failure even when `error` is absent too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> Response<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn err(reason: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(reason.into()),
        }
    }

    pub fn into_result(self, event: &'static str) -> Result<T, SessionError> {
        match self.data {
            Some(data) => Ok(data),
            None => Err(SessionError::Signaling {
                event,
                reason: self.error.unwrap_or_else(|| "empty response".to_string()),
            }),
        }
    }
}

impl Response<Value> {
    /// Decode the payload of a raw reply into its typed form.
    pub fn decode<T: DeserializeOwned>(self, event: &'static str) -> Result<T, SessionError> {
        let data = self.into_result(event)?;
        Ok(serde_json::from_value(data)?)
    }
}

/// A server push, decoded into one of the fixed event variants.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    NewProducer(PeerInfo),
    ProducerClosed(ProducerId),
    PeerConfig(PeerConfig),
    PeerMessage(ChatMessage),
    PeerLeft(PeerInfo),
}

impl PushEvent {
    pub fn decode(event: &str, payload: Value) -> Result<Self, SessionError> {
        fn unwrap_request<T: DeserializeOwned>(payload: Value) -> Result<T, SessionError> {
            let envelope: PushEnvelope<T> = serde_json::from_value(payload)?;
            Ok(envelope.request)
        }

        match event {
            push::NEW_PRODUCER => {
                let NewProducer { peer } = unwrap_request(payload)?;
                Ok(PushEvent::NewProducer(peer))
            }
            push::PRODUCER_CLOSED => {
                let ProducerClosed { producer_id } = unwrap_request(payload)?;
                Ok(PushEvent::ProducerClosed(producer_id))
            }
            push::PEER_CONFIG => Ok(PushEvent::PeerConfig(unwrap_request(payload)?)),
            push::PEER_MESSAGE => Ok(PushEvent::PeerMessage(unwrap_request(payload)?)),
            push::PEER_LEFT => Ok(PushEvent::PeerLeft(unwrap_request(payload)?)),
            other => Err(SessionError::Protocol(format!("unknown push event `{other}`"))),
        }
    }

    pub fn encode(&self) -> Result<(&'static str, Value), SessionError> {
        fn wrap<T: Serialize>(request: T) -> Result<Value, SessionError> {
            Ok(serde_json::to_value(PushEnvelope { request })?)
        }

        let payload = match self {
            PushEvent::NewProducer(peer) => wrap(NewProducer { peer: peer.clone() })?,
            PushEvent::ProducerClosed(producer_id) => wrap(ProducerClosed {
                producer_id: producer_id.clone(),
            })?,
            PushEvent::PeerConfig(config) => wrap(config)?,
            PushEvent::PeerMessage(message) => wrap(message)?,
            PushEvent::PeerLeft(peer) => wrap(peer)?,
        };
        Ok((self.name(), payload))
    }

    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::NewProducer(_) => push::NEW_PRODUCER,
            PushEvent::ProducerClosed(_) => push::PRODUCER_CLOSED,
            PushEvent::PeerConfig(_) => push::PEER_CONFIG,
            PushEvent::PeerMessage(_) => push::PEER_MESSAGE,
            PushEvent::PeerLeft(_) => push::PEER_LEFT,
        }
    }
}
