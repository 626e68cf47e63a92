//! Typed client for the Sonos cloud control API
//!
//! This crate owns the two stateful halves of talking to the Sonos cloud:
//! the OAuth credential lifecycle ([`AuthManager`]) and cached views of
//! the household ([`DeviceDirectory`], [`FavoritesCache`]). All traffic
//! flows through a shared [`Transport`] that retries transient timeouts
//! and gates mutating calls behind a process-wide write flag.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sonos_cloud::{AuthConfig, AuthManager, DeviceDirectory, Transport};
//!
//! # async fn run(config: AuthConfig) -> sonos_cloud::Result<()> {
//! let transport = Transport::new(reqwest::Client::new(), true);
//! let auth = Arc::new(AuthManager::new(config, transport.clone()));
//! auth.load();
//! tokio::spawn(Arc::clone(&auth).run_refresh_loop());
//!
//! let directory = DeviceDirectory::new(
//!     transport,
//!     auth,
//!     "https://api.ws.sonos.com/control/api/v1".to_string(),
//! );
//! let groups = directory.groups().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod directory;
pub mod error;
pub mod favorites;
pub mod model;
pub mod transport;

pub use auth::{AuthConfig, AuthManager};
pub use directory::DeviceDirectory;
pub use error::{CloudError, Result};
pub use favorites::FavoritesCache;
pub use model::{Credential, Favorite, Group, PlaybackState, Player};
pub use transport::Transport;
