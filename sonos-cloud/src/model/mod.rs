//! Value types for the Sonos cloud API

pub(crate) mod credential;
mod favorite;
mod group;
mod playback_state;

pub use credential::Credential;
pub use favorite::Favorite;
pub use group::{Group, Player};
pub use playback_state::PlaybackState;
