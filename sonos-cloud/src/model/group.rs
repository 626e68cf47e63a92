//! Group and Player value types

use serde::{Deserialize, Serialize};

use super::PlaybackState;

/// Playback type tags that cannot be meaningfully commanded
///
/// A group sourced from a TV or line-in input rejects transport commands,
/// so such groups are excluded from play and pause alike.
const PASSTHROUGH_SOURCES: &[&str] = &["linein", "linein.homeTheater"];

/// A single physical speaker endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Unique player identifier
    pub id: String,
    /// User-visible room name
    pub name: String,
}

/// A set of speakers currently playing in synchrony as one logical target
///
/// Groups are rebuilt wholesale on every topology fetch and never mutated
/// in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Unique group identifier
    pub id: String,
    /// User-visible group name
    pub name: String,
    /// Aggregate playback state reported by the provider
    pub playback_state: PlaybackState,
    /// Players in this group, in provider order
    pub players: Vec<Player>,
    /// Source tag from playback metadata (e.g. "linein.homeTheater"),
    /// populated only for groups that were playing at fetch time
    pub playback_type: Option<String>,
}

impl Group {
    /// Whether transport commands are meaningful for this group
    ///
    /// Groups sourced from HDMI/line-in passthrough cannot be commanded.
    pub fn is_controllable(&self) -> bool {
        match &self.playback_type {
            Some(kind) => !PASSTHROUGH_SOURCES
                .iter()
                .any(|src| kind.eq_ignore_ascii_case(src)),
            None => true,
        }
    }

    /// Controllable and currently idle or paused
    pub fn is_playable(&self) -> bool {
        self.is_controllable() && self.playback_state != PlaybackState::Playing
    }

    /// Controllable and currently playing
    pub fn is_pausable(&self) -> bool {
        self.is_controllable() && self.playback_state == PlaybackState::Playing
    }

    /// Number of players in this group
    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(state: PlaybackState, playback_type: Option<&str>) -> Group {
        Group {
            id: "RINCON_1:0".to_string(),
            name: "Living Room".to_string(),
            playback_state: state,
            players: vec![Player {
                id: "RINCON_1".to_string(),
                name: "Living Room".to_string(),
            }],
            playback_type: playback_type.map(str::to_string),
        }
    }

    #[test]
    fn test_plain_group_is_controllable() {
        assert!(group(PlaybackState::Idle, None).is_controllable());
        assert!(group(PlaybackState::Playing, Some("station")).is_controllable());
    }

    #[test]
    fn test_linein_group_is_not_controllable() {
        let g = group(PlaybackState::Playing, Some("linein.homeTheater"));
        assert!(!g.is_controllable());
        assert!(!g.is_playable());
        assert!(!g.is_pausable());

        let g = group(PlaybackState::Playing, Some("LINEIN"));
        assert!(!g.is_controllable());
    }

    #[test]
    fn test_playable_pausable_by_state() {
        assert!(group(PlaybackState::Idle, None).is_playable());
        assert!(group(PlaybackState::Paused, None).is_playable());
        assert!(!group(PlaybackState::Playing, None).is_playable());

        assert!(group(PlaybackState::Playing, None).is_pausable());
        assert!(!group(PlaybackState::Paused, None).is_pausable());
    }
}
