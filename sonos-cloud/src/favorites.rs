//! Read-through cache of the user's saved favorites

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::AuthManager;
use crate::directory::DeviceDirectory;
use crate::error::{CloudError, Result};
use crate::model::Favorite;
use crate::transport::Transport;

/// Interval between background favorites refreshes
const REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Deserialize)]
struct FavoritesResponse {
    #[serde(default)]
    items: Vec<Favorite>,
}

/// Hourly-refreshed snapshot of the household's favorites
///
/// Reads never touch the network; the snapshot is replaced wholesale by
/// the background loop. Initial population happens on the loop's first
/// iteration, best effort: a failed startup fetch is logged and retried
/// on the next cycle rather than failing construction.
pub struct FavoritesCache {
    transport: Transport,
    auth: Arc<AuthManager>,
    directory: Arc<DeviceDirectory>,
    control_base: String,
    snapshot: RwLock<Vec<Favorite>>,
}

impl FavoritesCache {
    pub fn new(
        transport: Transport,
        auth: Arc<AuthManager>,
        directory: Arc<DeviceDirectory>,
        control_base: String,
    ) -> Self {
        Self {
            transport,
            auth,
            directory,
            control_base,
            snapshot: RwLock::new(Vec::new()),
        }
    }

    /// The current cached snapshot; a pure cache read
    pub fn get_favorites(&self) -> Vec<Favorite> {
        self.snapshot.read().clone()
    }

    /// Look up a cached favorite by name, case-insensitively
    pub fn find_by_name(&self, name: &str) -> Option<Favorite> {
        self.snapshot
            .read()
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Fetch the favorites list and replace the snapshot wholesale
    pub async fn refresh(&self) -> Result<()> {
        let Some(household_id) = self.directory.household_id().await? else {
            return Err(CloudError::UnknownTopology);
        };

        let headers = self.auth.authorized_headers()?;
        let url = format!("{}/households/{}/favorites", self.control_base, household_id);
        let value = self.transport.get(&url, &[], headers).await?;
        let response: FavoritesResponse = serde_json::from_value(value)?;

        debug!(count = response.items.len(), "favorites refreshed");
        *self.snapshot.write() = response.items;
        Ok(())
    }

    /// Refresh the snapshot every hour, forever
    ///
    /// The first iteration runs immediately, which doubles as the eager
    /// startup population.
    pub async fn run_refresh_loop(self: Arc<Self>) {
        loop {
            if let Err(err) = self.refresh().await {
                warn!(%err, "favorites refresh failed");
            }
            tokio::time::sleep(REFRESH_INTERVAL).await;
        }
    }
}
