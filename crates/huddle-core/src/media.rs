//! Media engine contract.
//!
//! The engine owns every native object (transports, producers, consumers,
//! capture tracks). The session only holds identifiers and hands them back
//! through [`MediaHandle`] when something has to be closed.

use async_trait::async_trait;

use crate::errors::SessionError;
use crate::protocol::{
    AppData, ConsumeMedia, ConsumerId, DtlsParameters, RtpCapabilities, RtpParameters,
    TransportId, TransportOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A local capture track or a remote track received through a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self { id: id.into(), kind }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaStream {
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Which capture device to open for one track kind. `device_id: None`
/// selects the system default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackConstraint {
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: Option<TrackConstraint>,
    pub video: Option<TrackConstraint>,
}

impl MediaConstraints {
    pub fn audio_only(device_id: Option<String>) -> Self {
        Self {
            audio: Some(TrackConstraint { device_id }),
            video: None,
        }
    }

    pub fn video_only(device_id: Option<String>) -> Self {
        Self {
            audio: None,
            video: Some(TrackConstraint { device_id }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Result of preparing a local producer: the engine's own id for it plus
/// the RTP parameters the server needs to create its side.
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceOffer {
    pub local_id: String,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaHandle {
    Transport(TransportId),
    /// Engine-local producer id, as returned in [`ProduceOffer::local_id`].
    Producer(String),
    Consumer(ConsumerId),
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Start local capture. Permission and device errors surface here.
    async fn open_stream(&self, constraints: &MediaConstraints) -> Result<MediaStream, SessionError>;

    fn is_loaded(&self) -> bool;

    /// Capabilities negotiated by the last successful
    /// [`load_capabilities`](Self::load_capabilities) call.
    fn rtp_capabilities(&self) -> Option<RtpCapabilities>;

    async fn load_capabilities(
        &self,
        router_capabilities: RtpCapabilities,
    ) -> Result<RtpCapabilities, SessionError>;

    /// Build the local half of a send transport; returns the DTLS
    /// parameters to hand to `transport-connect`.
    async fn create_send_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<DtlsParameters, SessionError>;

    async fn create_recv_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<DtlsParameters, SessionError>;

    async fn produce(
        &self,
        transport_id: &str,
        track: &MediaTrack,
        app_data: AppData,
    ) -> Result<ProduceOffer, SessionError>;

    /// Create a local consumer for a server-side consumer. The consumer
    /// starts paused.
    async fn consume(
        &self,
        transport_id: &str,
        params: &ConsumeMedia,
    ) -> Result<MediaTrack, SessionError>;

    async fn resume(&self, consumer_id: &str) -> Result<(), SessionError>;

    /// Close a native object. Unknown handles are ignored.
    async fn close(&self, handle: MediaHandle);
}
