use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::media::{MediaConstraints, TrackConstraint};

const DEFAULT_REACTION_DURATION_MS: u64 = 3_000;

/// Side-effect hooks the UI can react to (sound, toast).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    PeerJoined,
    PeerLeft,
    PeerMessage,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub on_peer_joined: bool,
    #[serde(default = "default_true")]
    pub on_peer_left: bool,
    #[serde(default = "default_true")]
    pub on_peer_message: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            on_peer_joined: true,
            on_peer_left: true,
            on_peer_message: true,
        }
    }
}

/// Sound assets handed to the UI alongside each hook.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SoundConfig {
    #[serde(default)]
    pub peer_joined: Option<PathBuf>,
    #[serde(default)]
    pub peer_left: Option<PathBuf>,
    #[serde(default)]
    pub peer_message: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionConfig {
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub sounds: SoundConfig,
    #[serde(default = "default_reaction_duration_ms")]
    pub reaction_duration_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_reaction_duration_ms() -> u64 {
    DEFAULT_REACTION_DURATION_MS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            notifications: NotificationConfig::default(),
            sounds: SoundConfig::default(),
            reaction_duration_ms: DEFAULT_REACTION_DURATION_MS,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring config at {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, SessionError> {
        serde_json::from_str(json).map_err(|e| SessionError::Config(e.to_string()))
    }

    pub fn is_enabled(&self, notification: Notification) -> bool {
        match notification {
            Notification::PeerJoined => self.notifications.on_peer_joined,
            Notification::PeerLeft => self.notifications.on_peer_left,
            Notification::PeerMessage => self.notifications.on_peer_message,
        }
    }

    pub fn sound(&self, notification: Notification) -> Option<PathBuf> {
        match notification {
            Notification::PeerJoined => self.sounds.peer_joined.clone(),
            Notification::PeerLeft => self.sounds.peer_left.clone(),
            Notification::PeerMessage => self.sounds.peer_message.clone(),
        }
    }

    pub fn reaction_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reaction_duration_ms)
    }
}

/// Device choices for a join, passed in explicitly by the host.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DevicePreferences {
    #[serde(default)]
    pub audio_device: Option<String>,
    #[serde(default)]
    pub video_device: Option<String>,
    #[serde(default = "default_true")]
    pub mic_enabled_on_join: bool,
    #[serde(default)]
    pub camera_enabled_on_join: bool,
}

impl Default for DevicePreferences {
    fn default() -> Self {
        Self {
            audio_device: None,
            video_device: None,
            mic_enabled_on_join: true,
            camera_enabled_on_join: false,
        }
    }
}

impl DevicePreferences {
    /// Constraints for the initial capture on join.
    pub fn join_constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: self.mic_enabled_on_join.then(|| TrackConstraint {
                device_id: self.audio_device.clone(),
            }),
            video: self.camera_enabled_on_join.then(|| TrackConstraint {
                device_id: self.video_device.clone(),
            }),
        }
    }

    pub fn microphone(&self) -> MediaConstraints {
        MediaConstraints::audio_only(self.audio_device.clone())
    }

    pub fn camera(&self) -> MediaConstraints {
        MediaConstraints::video_only(self.video_device.clone())
    }
}
