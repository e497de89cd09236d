use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use crate::errors::SessionError;
use crate::protocol::{ChatMessage, PeerInfo};
use crate::session::SessionState;

/// Events emitted by the session to UI listeners.
///
/// Roster and chat updates always carry a full snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    RosterUpdated(Vec<PeerInfo>),
    ChatUpdated(Vec<ChatMessage>),
    PeerJoined {
        peer: PeerInfo,
        sound: Option<PathBuf>,
    },
    PeerLeft {
        peer: PeerInfo,
        sound: Option<PathBuf>,
    },
    MessageReceived {
        message: ChatMessage,
        sound: Option<PathBuf>,
    },
    /// A queued reconciliation step for `user_id` failed; later steps still run.
    ReconciliationFailed {
        user_id: String,
        error: SessionError,
    },
}

/// Trait for receiving events from the session.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Dispatches events to every registered listener.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
