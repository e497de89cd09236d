//! Huddle core: client-side session orchestration for SFU conference rooms.
//!
//! Pure Rust crate with no platform dependencies. The host supplies a
//! [`SignalingChannel`] and a [`MediaEngine`]; the crate keeps the roster,
//! chat and media negotiation consistent with server pushes.

pub mod chat;
pub mod config;
pub mod controls;
pub mod errors;
pub mod events;
pub mod logging;
pub mod media;
pub mod negotiation;
pub mod protocol;
pub mod roster;
pub mod sequencer;
pub mod session;
pub mod signaling;

#[cfg(test)]
mod test_support;

pub use chat::ChatService;
pub use config::{DevicePreferences, SessionConfig};
pub use controls::MeetingControls;
pub use errors::SessionError;
pub use events::{SessionEvent, SessionEventListener};
pub use logging::init_logging;
pub use media::{MediaEngine, MediaStream, MediaTrack};
pub use protocol::{ChatMessage, PeerConfig, PeerInfo, ProducerInfo, PushEvent, RoomInfo};
pub use session::{LocalUser, PushSubscription, SelfIdentity, Session, SessionState};
pub use signaling::SignalingChannel;
