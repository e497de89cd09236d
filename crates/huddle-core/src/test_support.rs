//! In-memory stand-ins for the routing server and the media engine.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{DevicePreferences, SessionConfig};
use crate::errors::SessionError;
use crate::events::{SessionEvent, SessionEventListener};
use crate::media::{
    MediaConstraints, MediaEngine, MediaHandle, MediaStream, MediaTrack, ProduceOffer, TrackKind,
};
use crate::protocol::{
    AppData, ConsumeMedia, DtlsParameters, MediaKind, PeerConfig, PeerInfo, ProducerInfo,
    PushEvent, Response, RoomInfo, RtpCapabilities, TransportOptions, request,
};
use crate::session::{LocalUser, PushSubscription, Session};
use crate::signaling::SignalingChannel;

#[derive(Default)]
struct ServerState {
    requests: Vec<(&'static str, Value)>,
    failures: HashMap<&'static str, String>,
    failing_consumes: HashSet<String>,
    consume_delays: HashMap<String, Duration>,
    request_delays: HashMap<&'static str, Duration>,
    error_statuses: HashSet<&'static str>,
    producer_kinds: HashMap<String, MediaKind>,
    peers: Vec<PeerInfo>,
    subscribers: Vec<mpsc::UnboundedSender<PushEvent>>,
}

/// Fake routing server. Answers every request with a plausible reply and
/// records what was sent.
#[derive(Default)]
pub(crate) struct MockSignaling {
    state: Mutex<ServerState>,
}

impl MockSignaling {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail(&self, event: &'static str, reason: &str) {
        self.state.lock().unwrap().failures.insert(event, reason.to_string());
    }

    pub(crate) fn recover(&self, event: &'static str) {
        self.state.lock().unwrap().failures.remove(event);
    }

    pub(crate) fn fail_consume_of(&self, producer_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_consumes
            .insert(producer_id.to_string());
    }

    pub(crate) fn delay_consume(&self, producer_id: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .consume_delays
            .insert(producer_id.to_string(), delay);
    }

    pub(crate) fn delay_request(&self, event: &'static str, delay: Duration) {
        self.state.lock().unwrap().request_delays.insert(event, delay);
    }

    /// Answer `event` with a payload whose status is `error`.
    pub(crate) fn reply_error_status(&self, event: &'static str) {
        self.state.lock().unwrap().error_statuses.insert(event);
    }

    pub(crate) fn register_producer(&self, producer_id: &str, kind: MediaKind) {
        self.state
            .lock()
            .unwrap()
            .producer_kinds
            .insert(producer_id.to_string(), kind);
    }

    pub(crate) fn set_peers(&self, peers: Vec<PeerInfo>) {
        let mut state = self.state.lock().unwrap();
        for peer in &peers {
            for p in &peer.producers {
                state.producer_kinds.insert(p.producer_id.clone(), p.kind);
            }
        }
        state.peers = peers;
    }

    /// Deliver a push through its wire encoding to every live subscriber.
    pub(crate) fn push(&self, event: PushEvent) {
        let (name, payload) = event.encode().unwrap();
        let decoded = PushEvent::decode(name, payload).unwrap();

        let mut state = self.state.lock().unwrap();
        if let PushEvent::NewProducer(peer) = &decoded {
            for p in &peer.producers {
                state.producer_kinds.insert(p.producer_id.clone(), p.kind);
            }
        }
        state.subscribers.retain(|tx| tx.send(decoded.clone()).is_ok());
    }

    pub(crate) fn live_subscribers(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub(crate) fn requests(&self, event: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(name, _)| *name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.requests(event).len()
    }

    pub(crate) fn total_requests(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    fn reply(&self, event: &'static str, payload: &Value) -> Response<Value> {
        let state = self.state.lock().unwrap();
        if state.error_statuses.contains(event) {
            return Response::ok(json!({ "status": "error" }));
        }
        let data = match event {
            request::JOIN_ROOM => json!({
                "peerId": format!("sock-{}", Uuid::new_v4()),
                "roomId": payload["roomInfo"]["roomId"],
                "roomName": payload["roomInfo"]["roomName"],
                "status": "success",
            }),
            request::GET_ROUTER_RTP_CAPABILITIES => {
                json!({ "codecs": [{ "mimeType": "audio/opus" }, { "mimeType": "video/VP8" }] })
            }
            request::CREATE_WEB_RTC_TRANSPORT => json!({
                "id": format!("transport-{}", Uuid::new_v4()),
                "iceParameters": {},
                "iceCandidates": [],
                "dtlsParameters": {},
            }),
            request::TRANSPORT_PRODUCE => {
                json!({ "producerId": format!("prod-{}", Uuid::new_v4()) })
            }
            request::CONSUME_MEDIA => {
                let producer_id = payload["remoteProducerId"].as_str().unwrap_or_default();
                if state.failing_consumes.contains(producer_id) {
                    return Response::err(format!("cannot consume {producer_id}"));
                }
                let kind = state
                    .producer_kinds
                    .get(producer_id)
                    .copied()
                    .unwrap_or(MediaKind::Video);
                json!({
                    "consumerId": format!("cons-{}", Uuid::new_v4()),
                    "producerId": producer_id,
                    "kind": kind,
                    "rtpParameters": {},
                })
            }
            request::GET_ALL_PEERS => json!({ "peers": state.peers }),
            request::PEER_MESSAGE => json!({ "peerMessage": payload, "status": "success" }),
            request::TRANSPORT_CONNECT
            | request::RESUME_CONSUMER
            | request::CLOSE_PRODUCER
            | request::PEER_CONFIG
            | request::PIN_PEER => json!({ "status": "success" }),
            other => return Response::err(format!("unknown event {other}")),
        };
        Response::ok(data)
    }
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    async fn request(&self, event: &'static str, payload: Value) -> Response<Value> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.requests.push((event, payload.clone()));
            if let Some(reason) = state.failures.get(event) {
                return Response::err(reason.clone());
            }
            payload["remoteProducerId"]
                .as_str()
                .and_then(|id| state.consume_delays.get(id).copied())
                .or_else(|| state.request_delays.get(event).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.reply(event, &payload)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<PushEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().subscribers.push(tx);
        rx
    }
}

#[derive(Default)]
struct EngineState {
    capabilities: Option<RtpCapabilities>,
    send_transports: usize,
    recv_transports: usize,
    transports: HashSet<String>,
    producers: HashSet<String>,
    consumers: HashSet<String>,
    resumed: Vec<String>,
    closed: Vec<MediaHandle>,
    fail_capture: bool,
    fail_produce: bool,
}

/// Media engine that keeps only bookkeeping.
#[derive(Default)]
pub(crate) struct MockMedia {
    state: Mutex<EngineState>,
}

impl MockMedia {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_capture(&self, fail: bool) {
        self.state.lock().unwrap().fail_capture = fail;
    }

    pub(crate) fn fail_produce(&self, fail: bool) {
        self.state.lock().unwrap().fail_produce = fail;
    }

    pub(crate) fn send_transports(&self) -> usize {
        self.state.lock().unwrap().send_transports
    }

    pub(crate) fn recv_transports(&self) -> usize {
        self.state.lock().unwrap().recv_transports
    }

    pub(crate) fn open_transports(&self) -> usize {
        self.state.lock().unwrap().transports.len()
    }

    pub(crate) fn live_producers(&self) -> Vec<String> {
        self.state.lock().unwrap().producers.iter().cloned().collect()
    }

    pub(crate) fn live_consumers(&self) -> Vec<String> {
        self.state.lock().unwrap().consumers.iter().cloned().collect()
    }

    pub(crate) fn resumed(&self) -> Vec<String> {
        self.state.lock().unwrap().resumed.clone()
    }

    pub(crate) fn closed(&self) -> Vec<MediaHandle> {
        self.state.lock().unwrap().closed.clone()
    }
}

#[async_trait]
impl MediaEngine for MockMedia {
    async fn open_stream(&self, constraints: &MediaConstraints) -> Result<MediaStream, SessionError> {
        if self.state.lock().unwrap().fail_capture {
            return Err(SessionError::Media("permission denied".into()));
        }
        let mut tracks = Vec::new();
        if constraints.audio.is_some() {
            tracks.push(MediaTrack::new(format!("mic-{}", Uuid::new_v4()), TrackKind::Audio));
        }
        if constraints.video.is_some() {
            tracks.push(MediaTrack::new(format!("cam-{}", Uuid::new_v4()), TrackKind::Video));
        }
        Ok(MediaStream::new(tracks))
    }

    fn is_loaded(&self) -> bool {
        self.state.lock().unwrap().capabilities.is_some()
    }

    fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.state.lock().unwrap().capabilities.clone()
    }

    async fn load_capabilities(
        &self,
        router_capabilities: RtpCapabilities,
    ) -> Result<RtpCapabilities, SessionError> {
        self.state.lock().unwrap().capabilities = Some(router_capabilities.clone());
        Ok(router_capabilities)
    }

    async fn create_send_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<DtlsParameters, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.send_transports += 1;
        state.transports.insert(options.id.clone());
        Ok(json!({ "role": "client" }))
    }

    async fn create_recv_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<DtlsParameters, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.recv_transports += 1;
        state.transports.insert(options.id.clone());
        Ok(json!({ "role": "client" }))
    }

    async fn produce(
        &self,
        _transport_id: &str,
        track: &MediaTrack,
        _app_data: AppData,
    ) -> Result<ProduceOffer, SessionError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_produce {
            return Err(SessionError::Negotiation("encoder unavailable".into()));
        }
        let local_id = format!("local-{}", Uuid::new_v4());
        state.producers.insert(local_id.clone());
        Ok(ProduceOffer {
            local_id,
            rtp_parameters: json!({ "mid": track.id }),
        })
    }

    async fn consume(
        &self,
        _transport_id: &str,
        params: &ConsumeMedia,
    ) -> Result<MediaTrack, SessionError> {
        self.state
            .lock()
            .unwrap()
            .consumers
            .insert(params.consumer_id.clone());
        let kind = match params.kind {
            MediaKind::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        };
        Ok(MediaTrack::new(format!("remote-{}", params.producer_id), kind))
    }

    async fn resume(&self, consumer_id: &str) -> Result<(), SessionError> {
        self.state.lock().unwrap().resumed.push(consumer_id.to_string());
        Ok(())
    }

    async fn close(&self, handle: MediaHandle) {
        let mut state = self.state.lock().unwrap();
        match &handle {
            MediaHandle::Transport(id) => state.transports.remove(id),
            MediaHandle::Producer(id) => state.producers.remove(id),
            MediaHandle::Consumer(id) => state.consumers.remove(id),
        };
        state.closed.push(handle);
    }
}

/// Captures every emitted event.
#[derive(Default)]
pub(crate) struct EventRecorder {
    events: Mutex<Vec<SessionEvent>>,
}

impl SessionEventListener for EventRecorder {
    fn on_event(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl EventRecorder {
    fn count(&self, pred: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub(crate) fn roster_updates(&self) -> usize {
        self.count(|e| matches!(e, SessionEvent::RosterUpdated(_)))
    }

    pub(crate) fn chat_updates(&self) -> usize {
        self.count(|e| matches!(e, SessionEvent::ChatUpdated(_)))
    }

    pub(crate) fn peer_joined(&self) -> usize {
        self.count(|e| matches!(e, SessionEvent::PeerJoined { .. }))
    }

    pub(crate) fn peer_left(&self) -> usize {
        self.count(|e| matches!(e, SessionEvent::PeerLeft { .. }))
    }

    pub(crate) fn messages_received(&self) -> usize {
        self.count(|e| matches!(e, SessionEvent::MessageReceived { .. }))
    }

    pub(crate) fn reconciliation_failures(&self) -> usize {
        self.count(|e| matches!(e, SessionEvent::ReconciliationFailed { .. }))
    }

    pub(crate) fn peer_left_sounds(&self) -> Vec<Option<PathBuf>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::PeerLeft { sound, .. } => Some(sound.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A session wired to the mocks, with a recorder attached.
pub(crate) struct Harness {
    pub(crate) session: Session,
    pub(crate) signaling: Arc<MockSignaling>,
    pub(crate) media: Arc<MockMedia>,
    pub(crate) events: Arc<EventRecorder>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub(crate) fn with_config(config: SessionConfig) -> Self {
        let signaling = Arc::new(MockSignaling::new());
        let media = Arc::new(MockMedia::new());
        let events = Arc::new(EventRecorder::default());
        let session = Session::new(signaling.clone(), media.clone(), config);
        session.add_listener(events.clone());
        Self {
            session,
            signaling,
            media,
            events,
        }
    }

    pub(crate) async fn join(&self) -> Result<PushSubscription, SessionError> {
        self.join_with(DevicePreferences::default()).await
    }

    pub(crate) async fn join_with(
        &self,
        devices: DevicePreferences,
    ) -> Result<PushSubscription, SessionError> {
        self.session
            .join(
                RoomInfo {
                    room_id: "r1".into(),
                    room_name: "Standup".into(),
                },
                LocalUser {
                    user_id: "me".into(),
                    display_name: "Me".into(),
                    device: "test".into(),
                },
                devices,
            )
            .await
    }

    /// Let pushes reach the session and every queued reconciliation finish.
    /// Relies on a paused clock: the sleeps only elapse once all other tasks
    /// are blocked.
    pub(crate) async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.session.wait_reconciled().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Snapshot of a remote peer owning the given producers.
pub(crate) fn remote_peer(user_id: &str, producers: &[(&str, MediaKind)]) -> PeerInfo {
    PeerInfo {
        peer_id: format!("sock-{user_id}"),
        user_id: user_id.to_string(),
        room_id: "r1".into(),
        room_name: "Standup".into(),
        display_name: user_id.to_uppercase(),
        device: "web".into(),
        peer_config: PeerConfig::for_user(user_id),
        producers: producers
            .iter()
            .map(|(id, kind)| ProducerInfo {
                producer_id: id.to_string(),
                kind: *kind,
                user_id: user_id.to_string(),
                track: None,
            })
            .collect(),
        ..Default::default()
    }
}
