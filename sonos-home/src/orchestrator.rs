//! Playback orchestration engine
//!
//! Turns the service's idempotent intents (toggle, play, pause, sleep)
//! into coordinated, partially parallel calls against the household.
//! Independent per-player and per-group calls are spawned concurrently
//! and joined with an all-settle barrier; the first error is surfaced
//! after every sibling has finished.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sonos_cloud::{
    AuthManager, CloudError, DeviceDirectory, FavoritesCache, Group, Player, Result, Transport,
};

use crate::config::Config;

/// Grouping, volume and sleep policy knobs, fixed at startup
#[derive(Debug, Clone)]
pub struct Policy {
    pub radio_favorite: Option<String>,
    pub sleep_favorite: Option<String>,
    pub sleep_room: String,
    pub sleep_volume: u8,
    pub sleep_delay: Duration,
    pub day_volume: u8,
    pub night_volume: u8,
    pub day_start_hour: u32,
    pub day_end_hour: u32,
}

impl Policy {
    /// Two-tier day/night volume in the service's local time zone
    ///
    /// A day window whose start is past its end wraps midnight.
    pub fn volume_for_hour(&self, hour: u32) -> u8 {
        let day = if self.day_start_hour <= self.day_end_hour {
            (self.day_start_hour..self.day_end_hour).contains(&hour)
        } else {
            hour >= self.day_start_hour || hour < self.day_end_hour
        };
        if day {
            self.day_volume
        } else {
            self.night_volume
        }
    }
}

impl From<&Config> for Policy {
    fn from(config: &Config) -> Self {
        Self {
            radio_favorite: config.radio_favorite.clone(),
            sleep_favorite: config.sleep_favorite.clone(),
            sleep_room: config.sleep_room.clone(),
            sleep_volume: config.sleep_volume,
            sleep_delay: Duration::from_secs(config.sleep_duration_minutes * 60),
            day_volume: config.day_volume,
            night_volume: config.night_volume,
            day_start_hour: config.day_start_hour,
            day_end_hour: config.day_end_hour,
        }
    }
}

/// A one-shot deferred pause; at most one live per process
struct SleepTimer {
    handle: JoinHandle<()>,
}

impl SleepTimer {
    /// Safe to call after the timer fired or was cancelled already
    fn cancel(&self) {
        self.handle.abort();
    }
}

/// Process-scoped orchestration state, owned exclusively by the orchestrator
#[derive(Default)]
struct OrchestrationState {
    last_toggled: Option<DateTime<Utc>>,
    sleep_timer: Option<SleepTimer>,
}

/// The playback state machine over the household's group topology
///
/// Holds no topology of its own: groups are re-fetched per operation and
/// replaced wholesale. Topology reported as unknown makes every operation
/// a no-op, except the sleep procedure's explicit
/// [`CloudError::NoSleepPlayersFound`].
pub struct Orchestrator {
    transport: Transport,
    auth: Arc<AuthManager>,
    directory: Arc<DeviceDirectory>,
    favorites: Arc<FavoritesCache>,
    control_base: String,
    policy: Policy,
    state: Mutex<OrchestrationState>,
}

impl Orchestrator {
    pub fn new(
        transport: Transport,
        auth: Arc<AuthManager>,
        directory: Arc<DeviceDirectory>,
        favorites: Arc<FavoritesCache>,
        control_base: String,
        policy: Policy,
    ) -> Self {
        Self {
            transport,
            auth,
            directory,
            favorites,
            control_base,
            policy,
            state: Mutex::new(OrchestrationState::default()),
        }
    }

    /// Flip the household between playing and paused
    ///
    /// Toggling is an explicit user override, so any armed sleep timer is
    /// cancelled first. If nothing controllable is playing, the play path
    /// runs; a fresh start (no toggle within the last hour) also loads the
    /// radio favorite, while a recent one resumes whatever was on.
    /// `last_toggled` advances on every invocation, both paths.
    pub async fn toggle(self: &Arc<Self>) -> Result<()> {
        self.cancel_sleep_timer();
        let previous = self.state.lock().last_toggled.replace(Utc::now());

        let Some(groups) = self.topology().await? else {
            debug!("toggle with unknown topology, nothing to do");
            return Ok(());
        };

        if groups.iter().any(Group::is_pausable) {
            info!("toggle: pausing active groups");
            settle(self.spawn_pauses(groups.iter().filter(|g| g.is_pausable()))).await
        } else {
            let fresh = previous.map_or(true, |at| Utc::now() - at >= chrono::Duration::hours(1));
            let favorite = if fresh {
                self.policy.radio_favorite.clone()
            } else {
                None
            };
            info!(fresh, "toggle: starting playback");
            self.group_and_play(favorite.as_deref()).await
        }
    }

    /// Unify the household into one group at a time-appropriate volume and
    /// start playback, optionally loading a named favorite
    pub async fn group_and_play(self: &Arc<Self>, favorite_name: Option<&str>) -> Result<()> {
        let Some(groups) = self.topology().await? else {
            return Ok(());
        };

        let players: Vec<Player> = groups.iter().flat_map(|g| g.players.clone()).collect();
        let volume = self.policy.volume_for_hour(Local::now().hour());

        // Volume sets are independent of regrouping: fire them now and
        // join after unification. A failed unification must still wait
        // for the in-flight volume calls before surfacing.
        let volume_tasks = self.spawn_volume_sets(&players, volume);
        let unified = self.unify(&groups, &players).await;
        let volumes = settle(volume_tasks).await;
        let group_id = unified?;
        volumes?;

        self.start_playback(&group_id, favorite_name).await
    }

    /// Gather the sleep-room players into one quiet group and arm a
    /// deferred pause
    pub async fn sleep_procedure(self: &Arc<Self>) -> Result<()> {
        let Some(groups) = self.topology().await? else {
            return Ok(());
        };

        settle(self.spawn_pauses(groups.iter().filter(|g| g.is_pausable()))).await?;

        let room = self.policy.sleep_room.to_lowercase();
        let sleep_players: Vec<Player> = groups
            .iter()
            .flat_map(|g| g.players.iter())
            .filter(|p| p.name.to_lowercase().contains(&room))
            .cloned()
            .collect();
        if sleep_players.is_empty() {
            return Err(CloudError::NoSleepPlayersFound);
        }

        let ids: Vec<&str> = sleep_players.iter().map(|p| p.id.as_str()).collect();
        let target = groups
            .iter()
            .max_by_key(|g| g.players.iter().filter(|p| ids.contains(&p.id.as_str())).count())
            .unwrap_or(&groups[0]);
        let group_id = self.set_group_members(&target.id, &ids).await?;

        settle(self.spawn_volume_sets(&sleep_players, self.policy.sleep_volume)).await?;
        self.start_playback(&group_id, self.policy.sleep_favorite.as_deref())
            .await?;

        self.arm_sleep_timer();
        Ok(())
    }

    /// Start playback on every controllable group concurrently
    pub async fn play_all(self: &Arc<Self>) -> Result<()> {
        let Some(groups) = self.topology().await? else {
            return Ok(());
        };
        let handles = groups
            .iter()
            .filter(|g| g.is_controllable())
            .map(|g| {
                let this = Arc::clone(self);
                let group_id = g.id.clone();
                tokio::spawn(async move { this.play_group(&group_id).await })
            })
            .collect();
        settle(handles).await
    }

    /// Pause every controllable group concurrently
    pub async fn pause_all(self: &Arc<Self>) -> Result<()> {
        let Some(groups) = self.topology().await? else {
            return Ok(());
        };
        settle(self.spawn_pauses(groups.iter().filter(|g| g.is_controllable()))).await
    }

    /// Drop any armed sleep timer; a no-op when none is armed or the
    /// timer already fired
    pub fn cancel_sleep_timer(&self) {
        if let Some(timer) = self.state.lock().sleep_timer.take() {
            timer.cancel();
        }
    }

    /// Current topology, with unknown topology collapsed to `None`
    async fn topology(&self) -> Result<Option<Vec<Group>>> {
        match self.directory.groups().await {
            Ok(groups) => Ok(Some(groups)),
            Err(CloudError::UnknownTopology) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Collapse the topology into a single target group
    ///
    /// One group is reused as-is; several are merged into whichever
    /// already holds the most players, which disrupts the fewest rooms.
    async fn unify(&self, groups: &[Group], players: &[Player]) -> Result<String> {
        let ids: Vec<&str> = players.iter().map(|p| p.id.as_str()).collect();
        match groups {
            [] => self.create_group(&ids).await,
            [only] => Ok(only.id.clone()),
            _ => {
                let target = groups
                    .iter()
                    .max_by_key(|g| g.player_count())
                    .unwrap_or(&groups[0]);
                self.set_group_members(&target.id, &ids).await
            }
        }
    }

    async fn create_group(&self, player_ids: &[&str]) -> Result<String> {
        let Some(household_id) = self.directory.household_id().await? else {
            return Err(CloudError::UnknownTopology);
        };
        let url = format!(
            "{}/households/{}/groups/createGroup",
            self.control_base, household_id
        );
        let value = self
            .post(&url, Some(json!({ "playerIds": player_ids })))
            .await?;
        group_id_from(&value).ok_or(CloudError::UnknownTopology)
    }

    async fn set_group_members(&self, group_id: &str, player_ids: &[&str]) -> Result<String> {
        let url = format!(
            "{}/groups/{}/groups/setGroupMembers",
            self.control_base, group_id
        );
        let value = self
            .post(&url, Some(json!({ "playerIds": player_ids })))
            .await?;
        Ok(group_id_from(&value).unwrap_or_else(|| group_id.to_string()))
    }

    /// Load a favorite onto the group if one is named and cached,
    /// otherwise issue a bare play
    async fn start_playback(&self, group_id: &str, favorite_name: Option<&str>) -> Result<()> {
        if let Some(name) = favorite_name {
            if let Some(favorite) = self.favorites.find_by_name(name) {
                info!(name, group_id, "loading favorite");
                let url = format!("{}/groups/{}/favorites", self.control_base, group_id);
                self.post(
                    &url,
                    Some(json!({ "favoriteId": favorite.id, "playOnCompletion": true })),
                )
                .await?;
                return Ok(());
            }
            warn!(name, "favorite not cached, falling back to bare play");
        }
        self.play_group(group_id).await
    }

    async fn play_group(&self, group_id: &str) -> Result<()> {
        let url = format!("{}/groups/{}/playback/play", self.control_base, group_id);
        self.post(&url, None).await.map(drop)
    }

    async fn pause_group(&self, group_id: &str) -> Result<()> {
        let url = format!("{}/groups/{}/playback/pause", self.control_base, group_id);
        self.post(&url, None).await.map(drop)
    }

    fn spawn_pauses<'a>(
        self: &Arc<Self>,
        groups: impl Iterator<Item = &'a Group>,
    ) -> Vec<JoinHandle<Result<()>>> {
        groups
            .map(|g| {
                let this = Arc::clone(self);
                let group_id = g.id.clone();
                tokio::spawn(async move { this.pause_group(&group_id).await })
            })
            .collect()
    }

    fn spawn_volume_sets(
        self: &Arc<Self>,
        players: &[Player],
        volume: u8,
    ) -> Vec<JoinHandle<Result<()>>> {
        players
            .iter()
            .map(|p| {
                let this = Arc::clone(self);
                let player_id = p.id.clone();
                tokio::spawn(async move {
                    let url = format!(
                        "{}/players/{}/playerVolume",
                        this.control_base, player_id
                    );
                    this.post(&url, Some(json!({ "volume": volume }))).await.map(drop)
                })
            })
            .collect()
    }

    fn arm_sleep_timer(self: &Arc<Self>) {
        let delay = self.policy.sleep_delay;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("sleep timer elapsed, pausing all groups");
            if let Err(err) = this.pause_all().await {
                warn!(%err, "deferred pause failed");
            }
        });
        let mut state = self.state.lock();
        if let Some(previous) = state.sleep_timer.replace(SleepTimer { handle }) {
            previous.cancel();
        }
    }

    async fn post(&self, url: &str, body: Option<serde_json::Value>) -> Result<serde_json::Value> {
        let headers = self.auth.authorized_headers()?;
        self.transport.post(url, body, headers).await
    }
}

fn group_id_from(value: &serde_json::Value) -> Option<String> {
    value["group"]["id"]
        .as_str()
        .or_else(|| value["id"].as_str())
        .map(str::to_string)
}

/// Join a fan-out after every sibling settles, surfacing the first error
async fn settle(handles: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                first_error.get_or_insert(err);
            }
            Err(err) => warn!(%err, "fan-out task failed to join"),
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
