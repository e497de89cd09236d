use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Notification;
use crate::errors::SessionError;
use crate::events::SessionEvent;
use crate::protocol::ChatMessage;
use crate::session::SessionCore;

/// Chat history for the current room, shared by the push loop and ChatService.
pub type MessageStore = Arc<Mutex<Vec<ChatMessage>>>;

const TIMESTAMP_FORMAT: &str = "%H:%M";

impl SessionCore {
    /// Publish a message; it is appended locally only once the server
    /// accepted it.
    pub(crate) async fn send_peer_message(&self, message: ChatMessage) -> Result<(), SessionError> {
        self.ensure_joined("send_peer_message")?;
        self.signaling.peer_message(&message).await?;

        let mut messages = self.messages.lock().await;
        messages.push(message);
        self.emitter.emit(SessionEvent::ChatUpdated(messages.clone()));
        Ok(())
    }

    pub(crate) async fn handle_peer_message(&self, message: ChatMessage) {
        {
            let mut messages = self.messages.lock().await;
            messages.push(message.clone());
            self.emitter.emit(SessionEvent::ChatUpdated(messages.clone()));
        }
        tracing::debug!(user_id = %message.user_id, "chat message received");
        self.notify(Notification::PeerMessage, |sound| SessionEvent::MessageReceived {
            message,
            sound,
        });
    }
}

/// Sends and lists chat messages for a session.
pub struct ChatService {
    core: Arc<SessionCore>,
}

impl ChatService {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Send `text` as the local participant, stamped with the local time.
    pub async fn send_text(&self, text: &str) -> Result<ChatMessage, SessionError> {
        self.core.ensure_joined("send_text")?;
        let identity = self.core.identity().await.ok_or(SessionError::InvalidState {
            operation: "send_text",
            state: self.core.state(),
        })?;

        let message = ChatMessage {
            user_id: identity.user_id,
            display_name: identity.display_name,
            text: text.to_string(),
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        };
        self.core.send_peer_message(message.clone()).await?;
        Ok(message)
    }

    /// Get all messages in the current session.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.core.messages.lock().await.clone()
    }
}
