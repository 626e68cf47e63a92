//! Playback state enumeration

use serde::{Deserialize, Serialize};

/// Current playback state of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Nothing queued or stopped
    Idle,
    /// Playback is paused
    Paused,
    /// Currently playing audio
    Playing,
}

impl PlaybackState {
    /// Parse from a Sonos cloud playback state string
    ///
    /// Handles the `PLAYBACK_STATE_*` values the groups endpoint reports:
    /// - "PLAYBACK_STATE_IDLE"
    /// - "PLAYBACK_STATE_PAUSED"
    /// - "PLAYBACK_STATE_PLAYING"
    /// - "PLAYBACK_STATE_BUFFERING" (counted as playing)
    pub fn from_api(state: &str) -> Self {
        match state.to_uppercase().as_str() {
            "PLAYBACK_STATE_PLAYING" | "PLAYBACK_STATE_BUFFERING" => PlaybackState::Playing,
            "PLAYBACK_STATE_PAUSED" => PlaybackState::Paused,
            _ => PlaybackState::Idle,
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Idle
    }
}
