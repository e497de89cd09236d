use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};

use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::chat::{ChatService, MessageStore};
use crate::config::{DevicePreferences, Notification, SessionConfig};
use crate::controls::MeetingControls;
use crate::errors::SessionError;
use crate::events::{EventEmitter, SessionEvent, SessionEventListener};
use crate::media::{MediaEngine, MediaStream};
use crate::negotiation::Negotiator;
use crate::protocol::{
    ChatMessage, JoinRoomRequest, JoinerInfo, MediaKind, PeerConfig, PeerInfo, PinPeerConfig,
    ProducerInfo, PushEvent, RoomInfo, RtpCapabilities,
};
use crate::roster::{Roster, Upsert};
use crate::sequencer::{ErrorSink, PeerSequencer};
use crate::signaling::{Signaling, SignalingChannel};

/// Lifecycle of a session: `Idle -> Joining -> Joined -> Leaving -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Joining,
    Joined,
    Leaving,
}

/// Who is joining, as known before the server assigns a peer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub user_id: String,
    pub display_name: String,
    pub device: String,
}

/// The local participant once joined.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfIdentity {
    pub user_id: String,
    pub peer_id: String,
    pub room_id: String,
    pub room_name: String,
    pub display_name: String,
    pub device: String,
    pub rtp_capabilities: RtpCapabilities,
}

/// Handle returned by [`Session::join`]; detaches every push handler.
#[derive(Clone)]
pub struct PushSubscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    active: Arc<AtomicBool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PushSubscription {
    fn start(core: &Arc<SessionCore>) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let events = core.signaling.subscribe();
        let task = tokio::spawn(SessionCore::push_loop(
            Arc::downgrade(core),
            events,
            active.clone(),
        ));
        Self {
            inner: Arc::new(SubscriptionInner {
                active,
                task: std::sync::Mutex::new(Some(task)),
            }),
        }
    }

    /// Stop handling server pushes. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        tracing::debug!("push handlers unsubscribed");
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }
}

pub(crate) struct SessionCore {
    pub(crate) signaling: Signaling,
    pub(crate) negotiator: Negotiator,
    pub(crate) config: SessionConfig,
    pub(crate) emitter: EventEmitter,
    state: std::sync::Mutex<SessionState>,
    identity: Mutex<Option<SelfIdentity>>,
    local_config: Mutex<PeerConfig>,
    devices: Mutex<DevicePreferences>,
    pub(crate) roster: Mutex<Roster>,
    pub(crate) messages: MessageStore,
    sequencer: PeerSequencer,
    subscription: Mutex<Option<PushSubscription>>,
    pub(crate) reaction_timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCore {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_state(&self, next: SessionState) -> SessionState {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, next)
        };
        if previous != next {
            self.emitter.emit(SessionEvent::StateChanged(next));
        }
        previous
    }

    fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionState> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != from {
                return Err(*state);
            }
            *state = to;
        }
        self.emitter.emit(SessionEvent::StateChanged(to));
        Ok(())
    }

    pub(crate) fn ensure_joined(&self, operation: &'static str) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Joined => Ok(()),
            state => Err(SessionError::InvalidState { operation, state }),
        }
    }

    pub(crate) async fn identity(&self) -> Option<SelfIdentity> {
        self.identity.lock().await.clone()
    }

    async fn local_user_id(&self, operation: &'static str) -> Result<String, SessionError> {
        self.identity
            .lock()
            .await
            .as_ref()
            .map(|i| i.user_id.clone())
            .ok_or(SessionError::InvalidState {
                operation,
                state: self.state(),
            })
    }

    pub(crate) async fn local_config(&self) -> PeerConfig {
        self.local_config.lock().await.clone()
    }

    pub(crate) async fn devices(&self) -> DevicePreferences {
        self.devices.lock().await.clone()
    }

    pub(crate) fn notify(&self, kind: Notification, event: impl FnOnce(Option<PathBuf>) -> SessionEvent) {
        if self.config.is_enabled(kind) {
            self.emitter.emit(event(self.config.sound(kind)));
        }
    }

    fn emit_roster(&self, roster: &Roster) {
        self.emitter.emit(SessionEvent::RosterUpdated(roster.snapshot()));
    }

    async fn join(
        self: &Arc<Self>,
        room: RoomInfo,
        user: LocalUser,
        devices: DevicePreferences,
    ) -> Result<PushSubscription, SessionError> {
        *self.devices.lock().await = devices.clone();

        let engine = self.negotiator.engine();
        let request = JoinRoomRequest {
            room_info: room,
            peer_info: JoinerInfo {
                user_id: user.user_id.clone(),
                display_name: user.display_name.clone(),
                device: user.device.clone(),
                rtp_capabilities: engine.rtp_capabilities().unwrap_or_else(|| json!({})),
            },
        };
        let joined = self.signaling.join_room(&request).await?;
        self.negotiator.load_capabilities().await?;

        let identity = SelfIdentity {
            user_id: user.user_id.clone(),
            peer_id: joined.peer_id,
            room_id: joined.room_id,
            room_name: joined.room_name,
            display_name: user.display_name,
            device: user.device,
            rtp_capabilities: engine.rtp_capabilities().unwrap_or_else(|| json!({})),
        };
        let local_config = PeerConfig {
            is_muted: !devices.mic_enabled_on_join,
            is_video_on: devices.camera_enabled_on_join,
            ..PeerConfig::for_user(&user.user_id)
        };
        *self.local_config.lock().await = local_config.clone();
        *self.identity.lock().await = Some(identity.clone());

        if let Err(state) = self.transition(SessionState::Joining, SessionState::Joined) {
            return Err(SessionError::InvalidState {
                operation: "join",
                state,
            });
        }
        tracing::info!(
            room_id = %identity.room_id,
            peer_id = %identity.peer_id,
            "joined room {}",
            identity.room_name
        );

        {
            let mut roster = self.roster.lock().await;
            roster.set_local(PeerInfo {
                peer_id: identity.peer_id.clone(),
                user_id: identity.user_id.clone(),
                room_id: identity.room_id.clone(),
                room_name: identity.room_name.clone(),
                display_name: identity.display_name.clone(),
                device: identity.device.clone(),
                peer_config: local_config,
                rtp_capabilities: identity.rtp_capabilities.clone(),
                ..Default::default()
            });
            self.emit_roster(&roster);
        }

        // Subscribe before listing peers so no push falls in between.
        let subscription = PushSubscription::start(self);
        *self.subscription.lock().await = Some(subscription.clone());

        self.start_local_media(&devices).await;

        match self.signaling.get_all_peers().await {
            Ok(all) => {
                for peer in all.peers.into_iter().filter(|p| p.user_id != identity.user_id) {
                    self.enqueue_snapshot(peer, false);
                }
            }
            Err(e) => tracing::warn!("could not list peers, waiting for pushes: {e}"),
        }

        Ok(subscription)
    }

    /// Capture and produce each initial track. Capture failure is not fatal.
    async fn start_local_media(&self, devices: &DevicePreferences) {
        let constraints = devices.join_constraints();
        if constraints.is_empty() {
            return;
        }
        let stream = match self.negotiator.engine().open_stream(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("joining without local media: {e}");
                return;
            }
        };
        for track in stream.tracks {
            let track_id = track.id.clone();
            if let Err(e) = self.create_producer(MediaStream::new(vec![track]), None).await {
                tracing::warn!(track_id = %track_id, "initial producer failed: {e}");
            }
        }
    }

    pub(crate) async fn create_producer(
        &self,
        stream: MediaStream,
        kind: Option<MediaKind>,
    ) -> Result<ProducerInfo, SessionError> {
        self.ensure_joined("create_producer")?;
        let user_id = self.local_user_id("create_producer").await?;
        let produced = self.negotiator.produce(&stream, kind, &user_id).await;
        // A failed attempt may still have closed the previous producer of its kind.
        self.refresh_local_entry().await;
        Ok(produced?.info())
    }

    pub(crate) async fn close_producer(&self, producer_id: &str) -> Result<(), SessionError> {
        self.ensure_joined("close_producer")?;
        self.signaling.close_producer(producer_id).await?;
        if self.negotiator.discard_producer(producer_id).await.is_some() {
            tracing::info!(producer_id, "producer closed");
        }
        self.refresh_local_entry().await;
        Ok(())
    }

    /// Rewrite the local roster entry from the producer set and config.
    /// Observers are only notified when the entry actually changed.
    async fn refresh_local_entry(&self) {
        let producers = self.negotiator.producer_infos().await;
        let config = self.local_config().await;
        let mut roster = self.roster.lock().await;
        let unchanged = roster
            .local()
            .is_some_and(|local| local.producers == producers && local.peer_config == config);
        if unchanged {
            return;
        }
        if roster.set_local_producers(producers) {
            roster.replace_config(config);
            self.emit_roster(&roster);
        }
    }

    pub(crate) async fn update_peer_config(&self, config: PeerConfig) -> Result<(), SessionError> {
        self.ensure_joined("update_peer_config")?;
        self.signaling.peer_config(&config).await?;

        let local_id = self.local_user_id("update_peer_config").await?;
        if config.user_id == local_id {
            *self.local_config.lock().await = config.clone();
        }

        let mut roster = self.roster.lock().await;
        if roster.replace_config(config) {
            self.emit_roster(&roster);
        } else {
            tracing::debug!("config update for a peer no longer in the room ignored");
        }
        Ok(())
    }

    async fn update_pin_peer(&self, pin: PinPeerConfig) -> Result<(), SessionError> {
        self.ensure_joined("update_pin_peer")?;
        self.signaling.pin_peer(&pin).await?;

        let local_id = self.local_user_id("update_pin_peer").await?;
        if pin.user_id == local_id {
            self.local_config.lock().await.is_pinned = pin.is_pinned;
        }

        let mut roster = self.roster.lock().await;
        if roster.set_pinned(&pin.user_id, pin.is_pinned) {
            self.emit_roster(&roster);
        } else {
            tracing::debug!(user_id = %pin.user_id, "pin for a peer no longer in the room ignored");
        }
        Ok(())
    }

    async fn leave(&self) {
        let previous = self.replace_state(SessionState::Leaving);
        tracing::info!(?previous, "leaving room");

        let producers = self.negotiator.producers().await;
        let results = join_all(producers.iter().map(|p| self.signaling.close_producer(&p.id))).await;
        for (producer, result) in producers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(producer_id = %producer.id, "close on leave failed: {e}");
            }
        }
        self.negotiator.reset().await;

        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.unsubscribe();
        }
        if let Some(timer) = self.reaction_timer.lock().await.take() {
            timer.abort();
        }

        self.roster.lock().await.clear();
        self.messages.lock().await.clear();
        *self.identity.lock().await = None;
        *self.local_config.lock().await = PeerConfig::default();

        self.replace_state(SessionState::Idle);
        self.emitter.emit(SessionEvent::RosterUpdated(Vec::new()));
        self.emitter.emit(SessionEvent::ChatUpdated(Vec::new()));
        tracing::info!("left room");
    }

    async fn push_loop(
        core: Weak<SessionCore>,
        mut events: mpsc::UnboundedReceiver<PushEvent>,
        active: Arc<AtomicBool>,
    ) {
        while let Some(event) = events.recv().await {
            if !active.load(Ordering::SeqCst) {
                break;
            }
            let Some(core) = core.upgrade() else {
                break;
            };
            core.dispatch(event).await;
        }
        tracing::debug!("push event loop ended");
    }

    async fn dispatch(self: &Arc<Self>, event: PushEvent) {
        tracing::debug!(event = event.name(), "push received");
        match event {
            PushEvent::NewProducer(peer) => self.enqueue_snapshot(peer, true),
            PushEvent::ProducerClosed(producer_id) => self.handle_producer_closed(&producer_id).await,
            PushEvent::PeerConfig(config) => {
                let core = Arc::clone(self);
                let key = config.user_id.clone();
                self.sequencer.push(&key, async move {
                    core.handle_peer_config(config).await;
                    Ok(())
                });
            }
            PushEvent::PeerMessage(message) => self.handle_peer_message(message).await,
            PushEvent::PeerLeft(peer) => {
                let core = Arc::clone(self);
                let key = peer.user_id.clone();
                self.sequencer.push(&key, async move {
                    core.handle_peer_left(peer).await;
                    Ok(())
                });
            }
        }
    }

    fn enqueue_snapshot(self: &Arc<Self>, peer: PeerInfo, announce: bool) {
        let core = Arc::clone(self);
        let key = peer.user_id.clone();
        self.sequencer
            .push(&key, async move { core.reconcile_peer(peer, announce).await });
    }

    /// Consume every producer of a snapshot, then install the snapshot.
    ///
    /// Producers that cannot be consumed are left out of the entry; the
    /// rest of the snapshot still applies.
    async fn reconcile_peer(&self, mut peer: PeerInfo, announce: bool) -> Result<(), SessionError> {
        if self.roster.lock().await.local_user_id() == Some(peer.user_id.as_str()) {
            tracing::debug!("ignoring snapshot of the local user");
            return Ok(());
        }

        let results = join_all(
            peer.producers
                .iter()
                .map(|p| self.negotiator.consume(p, &peer.user_id)),
        )
        .await;

        let total = peer.producers.len();
        let mut kept = Vec::with_capacity(total);
        for (mut producer, result) in peer.producers.drain(..).zip(results) {
            match result {
                Ok(track) => {
                    producer.user_id = peer.user_id.clone();
                    producer.track = Some(track);
                    kept.push(producer);
                }
                Err(e) => {
                    tracing::warn!(producer_id = %producer.producer_id, "consume failed: {e}");
                }
            }
        }
        let omitted = total - kept.len();
        peer.producers = kept;

        if self.state() != SessionState::Joined {
            tracing::debug!(user_id = %peer.user_id, "snapshot dropped after leave");
            return Ok(());
        }

        let outcome = {
            let mut roster = self.roster.lock().await;
            let outcome = roster.upsert(peer.clone());
            self.emit_roster(&roster);
            outcome
        };
        if announce && outcome == Upsert::Inserted {
            tracing::info!(user_id = %peer.user_id, "peer joined");
            self.notify(Notification::PeerJoined, |sound| SessionEvent::PeerJoined { peer, sound });
        }

        if omitted > 0 {
            return Err(SessionError::Negotiation(format!(
                "{omitted} of {total} producers could not be consumed"
            )));
        }
        Ok(())
    }

    async fn handle_producer_closed(&self, producer_id: &str) {
        self.negotiator.close_consumers_of_producer(producer_id).await;
        if self.negotiator.discard_producer(producer_id).await.is_some() {
            tracing::info!(producer_id, "server closed a local producer");
        }

        let mut roster = self.roster.lock().await;
        match roster.remove_producer(producer_id) {
            Some(owner) => {
                tracing::debug!(producer_id, owner = %owner, "producer removed");
                self.emit_roster(&roster);
            }
            None => tracing::debug!(producer_id, "closed producer not in roster"),
        }
    }

    async fn handle_peer_config(&self, config: PeerConfig) {
        let is_local = {
            let roster = self.roster.lock().await;
            roster.local_user_id() == Some(config.user_id.as_str())
        };
        if is_local {
            *self.local_config.lock().await = config.clone();
        }

        let mut roster = self.roster.lock().await;
        if roster.replace_config(config) {
            self.emit_roster(&roster);
        }
    }

    async fn handle_peer_left(&self, peer: PeerInfo) {
        let removed = {
            let mut roster = self.roster.lock().await;
            let removed = roster.remove(&peer.user_id);
            if removed.is_some() {
                self.emit_roster(&roster);
            }
            removed
        };
        let Some(removed) = removed else {
            tracing::debug!(user_id = %peer.user_id, "departed peer was not in roster");
            return;
        };

        self.negotiator.close_consumers_of_user(&removed.user_id).await;
        tracing::info!(user_id = %removed.user_id, "peer left");
        self.notify(Notification::PeerLeft, |sound| SessionEvent::PeerLeft {
            peer: removed,
            sound,
        });
    }
}

/// Orchestrates one participant's presence in a conference room.
pub struct Session {
    core: Arc<SessionCore>,
}

impl Session {
    pub fn new(
        channel: Arc<dyn SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
        config: SessionConfig,
    ) -> Self {
        let signaling = Signaling::new(channel);
        let emitter = EventEmitter::new();

        let sink_emitter = emitter.clone();
        let sink: ErrorSink = Arc::new(move |user_id: &str, error: &SessionError| {
            tracing::error!(user_id, "reconciliation step failed: {error}");
            sink_emitter.emit(SessionEvent::ReconciliationFailed {
                user_id: user_id.to_string(),
                error: error.clone(),
            });
        });

        Self {
            core: Arc::new(SessionCore {
                negotiator: Negotiator::new(signaling.clone(), engine),
                signaling,
                config,
                emitter,
                state: std::sync::Mutex::new(SessionState::Idle),
                identity: Mutex::new(None),
                local_config: Mutex::new(PeerConfig::default()),
                devices: Mutex::new(DevicePreferences::default()),
                roster: Mutex::new(Roster::new()),
                messages: Arc::new(Mutex::new(Vec::new())),
                sequencer: PeerSequencer::new(sink),
                subscription: Mutex::new(None),
                reaction_timer: Mutex::new(None),
            }),
        }
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.core.emitter.add_listener(listener);
    }

    /// Create MeetingControls bound to this session.
    pub fn controls(&self) -> MeetingControls {
        MeetingControls::new(self.core.clone())
    }

    /// Create a ChatService bound to this session.
    pub fn chat(&self) -> ChatService {
        ChatService::new(self.core.clone())
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Enter `room`.
    ///
    /// On success the session is `Joined`, push handlers are live and the
    /// peers already in the room are being reconciled in the background.
    /// Any signaling failure before that point returns the session to
    /// `Idle`; a failed join should not be retried on the same state.
    pub async fn join(
        &self,
        room: RoomInfo,
        user: LocalUser,
        devices: DevicePreferences,
    ) -> Result<PushSubscription, SessionError> {
        if let Err(state) = self.core.transition(SessionState::Idle, SessionState::Joining) {
            return Err(SessionError::InvalidState {
                operation: "join",
                state,
            });
        }
        let result = self.core.join(room, user, devices).await;
        if let Err(e) = &result {
            tracing::warn!("join failed: {e}");
            let _ = self.core.transition(SessionState::Joining, SessionState::Idle);
        }
        result
    }

    /// Produce `stream` (its video track, else its audio track; the video
    /// track for `MediaKind::Screen`). A producer of the same kind is closed
    /// first.
    pub async fn create_producer(
        &self,
        stream: MediaStream,
        kind: Option<MediaKind>,
    ) -> Result<ProducerInfo, SessionError> {
        self.core.create_producer(stream, kind).await
    }

    /// Close a local producer. If the server refuses, the producer stays.
    pub async fn close_producer(&self, producer_id: &str) -> Result<(), SessionError> {
        self.core.close_producer(producer_id).await
    }

    /// Publish a full config object; last write wins.
    pub async fn update_peer_config(&self, config: PeerConfig) -> Result<(), SessionError> {
        self.core.update_peer_config(config).await
    }

    pub async fn update_pin_peer(&self, pin: PinPeerConfig) -> Result<(), SessionError> {
        self.core.update_pin_peer(pin).await
    }

    pub async fn send_peer_message(&self, message: ChatMessage) -> Result<(), SessionError> {
        self.core.send_peer_message(message).await
    }

    /// Close every local producer, drop all state and detach push handlers.
    /// Safe to call in any state.
    pub async fn leave_room(&self) {
        self.core.leave().await;
    }

    /// Roster snapshot, local participant first.
    pub async fn roster(&self) -> Vec<PeerInfo> {
        self.core.roster.lock().await.snapshot()
    }

    /// The local participant's roster entry, if joined.
    pub async fn local_peer(&self) -> Option<PeerInfo> {
        self.core.roster.lock().await.local().cloned()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.core.messages.lock().await.clone()
    }

    pub async fn identity(&self) -> Option<SelfIdentity> {
        self.core.identity().await
    }

    pub async fn local_config(&self) -> PeerConfig {
        self.core.local_config().await
    }

    pub async fn local_producers(&self) -> Vec<ProducerInfo> {
        self.core.negotiator.producer_infos().await
    }

    pub async fn consumer_count(&self) -> usize {
        self.core.negotiator.consumers().await.len()
    }

    /// Wait until every queued per-peer reconciliation has finished.
    pub async fn wait_reconciled(&self) {
        self.core.sequencer.wait_idle().await;
    }
}
