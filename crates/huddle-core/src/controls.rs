use std::sync::Arc;

use crate::errors::SessionError;
use crate::media::MediaStream;
use crate::protocol::{MediaKind, PeerConfig, ProducerInfo, Reaction};
use crate::session::SessionCore;

/// Local participant controls: microphone, camera, screen share, hand and
/// reactions.
///
/// Each toggle publishes the updated config first, then opens or closes the
/// matching producer. A reaction is cleared automatically after
/// `reaction_duration_ms`; a newer reaction restarts the timer.
pub struct MeetingControls {
    core: Arc<SessionCore>,
}

impl MeetingControls {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    async fn publish(&self, edit: impl FnOnce(&mut PeerConfig)) -> Result<(), SessionError> {
        let mut config = self.core.local_config().await;
        edit(&mut config);
        self.core.update_peer_config(config).await
    }

    async fn close_kind(&self, kind: MediaKind) -> Result<(), SessionError> {
        match self.core.negotiator.producer_of_kind(kind).await {
            Some(producer) => self.core.close_producer(&producer.id).await,
            None => Ok(()),
        }
    }

    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.core.ensure_joined("set_microphone_enabled")?;
        self.publish(|c| c.is_muted = !enabled).await?;
        if !enabled {
            return self.close_kind(MediaKind::Audio).await;
        }
        let constraints = self.core.devices().await.microphone();
        let stream = self.core.negotiator.engine().open_stream(&constraints).await?;
        self.core.create_producer(stream, Some(MediaKind::Audio)).await?;
        Ok(())
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.core.ensure_joined("set_camera_enabled")?;
        self.publish(|c| c.is_video_on = enabled).await?;
        if !enabled {
            return self.close_kind(MediaKind::Video).await;
        }
        let constraints = self.core.devices().await.camera();
        let stream = self.core.negotiator.engine().open_stream(&constraints).await?;
        self.core.create_producer(stream, Some(MediaKind::Video)).await?;
        Ok(())
    }

    /// Share the video track of `stream`, captured by the host.
    pub async fn start_screen_share(&self, stream: MediaStream) -> Result<ProducerInfo, SessionError> {
        self.core.ensure_joined("start_screen_share")?;
        self.publish(|c| c.is_sharing_screen = true).await?;
        self.core.create_producer(stream, Some(MediaKind::Screen)).await
    }

    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        self.core.ensure_joined("stop_screen_share")?;
        self.publish(|c| c.is_sharing_screen = false).await?;
        self.close_kind(MediaKind::Screen).await
    }

    pub async fn set_hand_raised(&self, raised: bool) -> Result<(), SessionError> {
        self.core.ensure_joined("set_hand_raised")?;
        self.publish(|c| c.has_raised_hand = raised).await
    }

    pub async fn send_reaction(&self, reaction: Reaction) -> Result<(), SessionError> {
        self.core.ensure_joined("send_reaction")?;
        self.publish(|c| c.reaction = reaction).await?;
        if reaction == Reaction::None {
            if let Some(timer) = self.core.reaction_timer.lock().await.take() {
                timer.abort();
            }
            return Ok(());
        }

        let core = Arc::downgrade(&self.core);
        let duration = self.core.config.reaction_duration();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let Some(core) = core.upgrade() else {
                return;
            };
            let mut config = core.local_config().await;
            config.reaction = Reaction::None;
            if let Err(e) = core.update_peer_config(config).await {
                tracing::warn!("clearing reaction failed: {e}");
            }
        });
        if let Some(previous) = self.core.reaction_timer.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    pub async fn is_microphone_enabled(&self) -> bool {
        !self.core.local_config().await.is_muted
    }

    pub async fn is_camera_enabled(&self) -> bool {
        self.core.local_config().await.is_video_on
    }

    pub async fn is_hand_raised(&self) -> bool {
        self.core.local_config().await.has_raised_hand
    }
}
