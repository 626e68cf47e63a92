//! Household and group topology resolution

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::auth::AuthManager;
use crate::error::{CloudError, Result};
use crate::model::{Group, PlaybackState, Player};
use crate::transport::Transport;

#[derive(Debug, Deserialize)]
struct HouseholdsResponse {
    households: Vec<HouseholdEntry>,
}

#[derive(Debug, Deserialize)]
struct HouseholdEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupsResponse {
    #[serde(default)]
    groups: Vec<GroupEntry>,
    #[serde(default)]
    players: Vec<PlayerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupEntry {
    id: String,
    name: String,
    playback_state: String,
    #[serde(default)]
    player_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlayerEntry {
    id: String,
    name: String,
}

/// Resolves and caches the household id and live group/player topology
///
/// The household id is memoized for the process lifetime after the first
/// successful fetch; a household does not change while the service runs.
/// Groups are rebuilt wholesale on every call, never patched.
pub struct DeviceDirectory {
    transport: Transport,
    auth: Arc<AuthManager>,
    control_base: String,
    household_id: RwLock<Option<String>>,
}

impl DeviceDirectory {
    pub fn new(transport: Transport, auth: Arc<AuthManager>, control_base: String) -> Self {
        Self {
            transport,
            auth,
            control_base,
            household_id: RwLock::new(None),
        }
    }

    /// The connected household id, or `None` when the account has no devices
    pub async fn household_id(&self) -> Result<Option<String>> {
        if let Some(id) = self.household_id.read().clone() {
            return Ok(Some(id));
        }

        let headers = self.auth.authorized_headers()?;
        let url = format!("{}/households", self.control_base);
        let value = self
            .transport
            .get(&url, &[("connectedOnly", "true")], headers)
            .await?;
        let response: HouseholdsResponse = serde_json::from_value(value)?;

        let Some(entry) = response.households.into_iter().next() else {
            debug!("no connected households");
            return Ok(None);
        };
        *self.household_id.write() = Some(entry.id.clone());
        Ok(Some(entry.id))
    }

    /// Fetch the current group/player topology
    ///
    /// Playing groups get one follow-up playbackMetadata call to populate
    /// `playback_type`; that call is skipped for idle and paused groups as
    /// a latency optimization. Zero groups (or no household) is reported
    /// as [`CloudError::UnknownTopology`], which callers treat as "nothing
    /// to do" rather than a failure.
    pub async fn groups(&self) -> Result<Vec<Group>> {
        let Some(household_id) = self.household_id().await? else {
            return Err(CloudError::UnknownTopology);
        };

        let headers = self.auth.authorized_headers()?;
        let url = format!("{}/households/{}/groups", self.control_base, household_id);
        let value = self.transport.get(&url, &[], headers).await?;
        let response: GroupsResponse = serde_json::from_value(value)?;

        if response.groups.is_empty() {
            return Err(CloudError::UnknownTopology);
        }

        let players: std::collections::HashMap<String, String> = response
            .players
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        let mut groups = Vec::with_capacity(response.groups.len());
        for entry in response.groups {
            let playback_state = PlaybackState::from_api(&entry.playback_state);
            let playback_type = if playback_state == PlaybackState::Playing {
                self.playback_type(&entry.id).await?
            } else {
                None
            };
            let members = entry
                .player_ids
                .iter()
                .map(|id| Player {
                    id: id.clone(),
                    name: players.get(id).cloned().unwrap_or_else(|| id.clone()),
                })
                .collect();
            groups.push(Group {
                id: entry.id,
                name: entry.name,
                playback_state,
                players: members,
                playback_type,
            });
        }
        debug!(count = groups.len(), "topology fetched");
        Ok(groups)
    }

    /// The source tag of whatever a group is currently playing
    async fn playback_type(&self, group_id: &str) -> Result<Option<String>> {
        let headers = self.auth.authorized_headers()?;
        let url = format!("{}/groups/{}/playbackMetadata", self.control_base, group_id);
        let value = self.transport.get(&url, &[], headers).await?;
        Ok(value["container"]["type"].as_str().map(str::to_string))
    }
}
