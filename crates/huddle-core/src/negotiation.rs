//! Transport, producer and consumer negotiation.
//!
//! One send and one receive transport per session, each created lazily on
//! first use. Local producers and consumers are tracked by id here; the
//! native objects stay inside the [`MediaEngine`].
//!
//! Every [`Negotiator::reset`] starts a new epoch. An operation that began in
//! an earlier epoch closes whatever it created and fails instead of
//! registering it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use tokio::sync::Mutex;

use crate::errors::SessionError;
use crate::media::{MediaEngine, MediaHandle, MediaStream, MediaTrack};
use crate::protocol::{
    AppData, ConsumeMediaRequest, ConsumerId, MediaKind, ProducerId, ProducerInfo, TransportId,
    TransportProduceRequest,
};
use crate::session::SessionState;
use crate::signaling::Signaling;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalProducer {
    pub id: ProducerId,
    /// Engine-side id, used to close the native producer.
    pub local_id: String,
    pub kind: MediaKind,
    pub user_id: String,
    pub track: MediaTrack,
}

impl LocalProducer {
    pub fn info(&self) -> ProducerInfo {
        ProducerInfo {
            producer_id: self.id.clone(),
            kind: self.kind,
            user_id: self.user_id.clone(),
            track: Some(self.track.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalConsumer {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub user_id: String,
    pub track: MediaTrack,
}

#[derive(Clone, Copy)]
enum Direction {
    Send,
    Recv,
}

pub(crate) struct Negotiator {
    signaling: Signaling,
    engine: Arc<dyn MediaEngine>,
    send_transport: Mutex<Option<TransportId>>,
    recv_transport: Mutex<Option<TransportId>>,
    producers: Mutex<Vec<LocalProducer>>,
    consumers: Mutex<Vec<LocalConsumer>>,
    /// Serializes local produce requests so the per-kind invariant holds.
    produce_lock: Mutex<()>,
    epoch: AtomicU64,
}

impl Negotiator {
    pub(crate) fn new(signaling: Signaling, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            signaling,
            engine,
            send_transport: Mutex::new(None),
            recv_transport: Mutex::new(None),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            produce_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn ensure_epoch(&self, epoch: u64, operation: &'static str) -> Result<(), SessionError> {
        if self.epoch() == epoch {
            return Ok(());
        }
        tracing::debug!(operation, "discarding result from a previous session");
        Err(SessionError::InvalidState {
            operation,
            state: SessionState::Leaving,
        })
    }

    pub(crate) fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    /// Load router capabilities into the engine unless already loaded.
    pub(crate) async fn load_capabilities(&self) -> Result<(), SessionError> {
        if self.engine.is_loaded() {
            return Ok(());
        }
        let router = self.signaling.get_router_rtp_capabilities().await?;
        self.engine.load_capabilities(router).await?;
        Ok(())
    }

    async fn transport(&self, direction: Direction, epoch: u64) -> Result<TransportId, SessionError> {
        let slot = match direction {
            Direction::Send => &self.send_transport,
            Direction::Recv => &self.recv_transport,
        };
        // Held across creation so concurrent callers wait for the one transport.
        let mut slot = slot.lock().await;
        self.ensure_epoch(epoch, "transport")?;
        if let Some(id) = slot.as_ref() {
            return Ok(id.clone());
        }

        let options = self.signaling.create_web_rtc_transport().await?;
        let dtls = match direction {
            Direction::Send => self.engine.create_send_transport(&options).await?,
            Direction::Recv => self.engine.create_recv_transport(&options).await?,
        };
        let connected = self.signaling.transport_connect(&options.id, dtls).await;
        if let Err(e) = connected.and_then(|_| self.ensure_epoch(epoch, "transport")) {
            self.engine.close(MediaHandle::Transport(options.id.clone())).await;
            return Err(e);
        }

        tracing::info!(transport_id = %options.id, "transport ready");
        *slot = Some(options.id.clone());
        Ok(options.id)
    }

    /// Produce one track of `stream`.
    ///
    /// `Screen` uses the video track; with no kind the video track wins over
    /// the audio one. Any existing producer of the same kind is closed before
    /// the new one is requested.
    pub(crate) async fn produce(
        &self,
        stream: &MediaStream,
        kind: Option<MediaKind>,
        user_id: &str,
    ) -> Result<LocalProducer, SessionError> {
        let (kind, track) = match kind {
            Some(MediaKind::Screen) => (MediaKind::Screen, stream.video_track()),
            Some(MediaKind::Video) => (MediaKind::Video, stream.video_track()),
            Some(MediaKind::Audio) => (MediaKind::Audio, stream.audio_track()),
            Some(MediaKind::None) => {
                return Err(SessionError::Negotiation("cannot produce kind `none`".into()));
            }
            None => match stream.video_track() {
                Some(track) => (MediaKind::Video, Some(track)),
                None => (MediaKind::Audio, stream.audio_track()),
            },
        };
        let track = track
            .cloned()
            .ok_or_else(|| SessionError::Negotiation(format!("stream has no track for {kind:?}")))?;

        let epoch = self.epoch();
        let _guard = self.produce_lock.lock().await;
        let transport_id = self.transport(Direction::Send, epoch).await?;

        let displaced: Vec<LocalProducer> = {
            let mut producers = self.producers.lock().await;
            let (same, rest): (Vec<_>, Vec<_>) = producers.drain(..).partition(|p| p.kind == kind);
            *producers = rest;
            same
        };
        for old in displaced {
            tracing::info!(producer_id = %old.id, ?kind, "replacing producer");
            self.engine.close(MediaHandle::Producer(old.local_id)).await;
        }

        let app_data = AppData { kind };
        let offer = self.engine.produce(&transport_id, &track, app_data).await?;
        let request = TransportProduceRequest {
            transport_id,
            kind,
            rtp_parameters: offer.rtp_parameters,
            app_data,
        };
        let produced = match self.signaling.transport_produce(&request).await {
            Ok(produced) => produced,
            Err(e) => {
                self.engine.close(MediaHandle::Producer(offer.local_id)).await;
                return Err(e);
            }
        };

        let producer = LocalProducer {
            id: produced.producer_id,
            local_id: offer.local_id,
            kind,
            user_id: user_id.to_string(),
            track,
        };
        {
            let mut producers = self.producers.lock().await;
            // Checked under the lock: reset bumps the epoch before draining.
            if let Err(e) = self.ensure_epoch(epoch, "create_producer") {
                drop(producers);
                self.engine.close(MediaHandle::Producer(producer.local_id)).await;
                return Err(e);
            }
            producers.push(producer.clone());
        }
        tracing::info!(producer_id = %producer.id, ?kind, "producer created");
        Ok(producer)
    }

    /// Forget a local producer and close its native side.
    pub(crate) async fn discard_producer(&self, producer_id: &str) -> Option<LocalProducer> {
        let removed = {
            let mut producers = self.producers.lock().await;
            let index = producers.iter().position(|p| p.id == producer_id)?;
            producers.remove(index)
        };
        self.engine.close(MediaHandle::Producer(removed.local_id.clone())).await;
        Some(removed)
    }

    pub(crate) async fn producers(&self) -> Vec<LocalProducer> {
        self.producers.lock().await.clone()
    }

    pub(crate) async fn producer_infos(&self) -> Vec<ProducerInfo> {
        self.producers.lock().await.iter().map(LocalProducer::info).collect()
    }

    pub(crate) async fn producer_of_kind(&self, kind: MediaKind) -> Option<LocalProducer> {
        self.producers.lock().await.iter().find(|p| p.kind == kind).cloned()
    }

    /// Turn a remote producer into a local consumer and return the received
    /// track. A producer that is already consumed reuses its consumer.
    pub(crate) async fn consume(
        &self,
        producer: &ProducerInfo,
        user_id: &str,
    ) -> Result<MediaTrack, SessionError> {
        if let Some(existing) = self
            .consumers
            .lock()
            .await
            .iter()
            .find(|c| c.producer_id == producer.producer_id)
        {
            return Ok(existing.track.clone());
        }
        let epoch = self.epoch();

        let rtp_capabilities = self
            .engine
            .rtp_capabilities()
            .ok_or_else(|| SessionError::Negotiation("media capabilities not loaded".into()))?;
        let transport_id = self.transport(Direction::Recv, epoch).await?;

        let params = self
            .signaling
            .consume_media(&ConsumeMediaRequest {
                remote_producer_id: producer.producer_id.clone(),
                consumer_transport_id: transport_id.clone(),
                rtp_capabilities,
            })
            .await?;
        // The server side dies with the transport closed by reset.
        self.ensure_epoch(epoch, "consume")?;
        let track = self.engine.consume(&transport_id, &params).await?;

        {
            let mut consumers = self.consumers.lock().await;
            if let Err(e) = self.ensure_epoch(epoch, "consume") {
                drop(consumers);
                self.engine.close(MediaHandle::Consumer(params.consumer_id.clone())).await;
                return Err(e);
            }
            consumers.push(LocalConsumer {
                id: params.consumer_id.clone(),
                producer_id: params.producer_id.clone(),
                user_id: user_id.to_string(),
                track: track.clone(),
            });
        }
        tracing::debug!(consumer_id = %params.consumer_id, producer_id = %params.producer_id, "consumer created");

        // Consumers start paused; failing to resume is not fatal.
        if let Err(e) = self.engine.resume(&params.consumer_id).await {
            tracing::warn!(consumer_id = %params.consumer_id, "local resume failed: {e}");
        }
        if let Err(e) = self.signaling.resume_consumer(&params.consumer_id).await {
            tracing::warn!(consumer_id = %params.consumer_id, "resume-consumer failed: {e}");
        }

        Ok(track)
    }

    async fn close_consumers_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&LocalConsumer) -> bool,
    {
        let closed: Vec<LocalConsumer> = {
            let mut consumers = self.consumers.lock().await;
            let (matching, rest): (Vec<_>, Vec<_>) = consumers.drain(..).partition(|c| pred(c));
            *consumers = rest;
            matching
        };
        let count = closed.len();
        join_all(
            closed
                .into_iter()
                .map(|c| self.engine.close(MediaHandle::Consumer(c.id))),
        )
        .await;
        count
    }

    pub(crate) async fn close_consumers_of_producer(&self, producer_id: &str) -> usize {
        self.close_consumers_where(|c| c.producer_id == producer_id).await
    }

    pub(crate) async fn close_consumers_of_user(&self, user_id: &str) -> usize {
        self.close_consumers_where(|c| c.user_id == user_id).await
    }

    pub(crate) async fn consumers(&self) -> Vec<LocalConsumer> {
        self.consumers.lock().await.clone()
    }

    /// Close every native object and forget all ids, transports included.
    pub(crate) async fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.close_consumers_where(|_| true).await;

        let producers: Vec<LocalProducer> = self.producers.lock().await.drain(..).collect();
        for producer in producers {
            self.engine.close(MediaHandle::Producer(producer.local_id)).await;
        }

        for slot in [&self.send_transport, &self.recv_transport] {
            if let Some(id) = slot.lock().await.take() {
                self.engine.close(MediaHandle::Transport(id)).await;
            }
        }
    }
}
