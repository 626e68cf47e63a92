//! Favorite value type

use serde::{Deserialize, Serialize};

/// A provider-stored playable item (station, playlist) loadable onto a group
///
/// Favorites are refreshed as a batch; stale entries are replaced wholesale,
/// never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    /// Provider-assigned favorite identifier
    pub id: String,
    /// User-visible name
    pub name: String,
    /// Short description supplied by the provider
    #[serde(default)]
    pub description: String,
}
