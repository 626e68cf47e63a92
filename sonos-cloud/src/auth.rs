//! OAuth credential lifecycle
//!
//! [`AuthManager`] owns the single credential slot: it issues authorization
//! links with a CSRF state token, exchanges callback codes, persists the
//! credential to disk on every update, and proactively refreshes it from a
//! background loop one hour before expiry so authorized calls never see an
//! expired token.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{CloudError, Result};
use crate::model::Credential;
use crate::model::credential::TokenResponse;
use crate::transport::Transport;

/// OAuth scope requested from the provider
const SCOPE: &str = "playback-control-all";

/// Poll interval while no credential exists yet (login not completed)
const UNAUTHENTICATED_POLL: Duration = Duration::from_secs(5);

/// Backoff after a failed background refresh before trying again
const REFRESH_RETRY: Duration = Duration::from_secs(60);

/// Static configuration for the OAuth flow
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Base URL of the login service, e.g. `https://api.sonos.com/login/v3`
    pub auth_base: String,
    /// Where the credential JSON record is persisted
    pub credential_path: PathBuf,
}

/// Owner of the OAuth credential and the pending CSRF state
pub struct AuthManager {
    config: AuthConfig,
    transport: Transport,
    credential: RwLock<Option<Credential>>,
    pending_state: Mutex<Option<String>>,
}

impl AuthManager {
    pub fn new(config: AuthConfig, transport: Transport) -> Self {
        Self {
            config,
            transport,
            credential: RwLock::new(None),
            pending_state: Mutex::new(None),
        }
    }

    /// Load the persisted credential, if any
    ///
    /// An absent or corrupt file yields the empty slot, not an error; the
    /// user re-authenticates via /login. Returns whether a credential was
    /// loaded.
    pub fn load(&self) -> bool {
        let raw = match std::fs::read_to_string(&self.config.credential_path) {
            Ok(raw) => raw,
            Err(_) => {
                info!("no persisted credential, waiting for /login");
                return false;
            }
        };
        match serde_json::from_str::<Credential>(&raw) {
            Ok(credential) => {
                info!(expires_at = %credential.expires_at, "credential loaded from disk");
                *self.credential.write() = Some(credential);
                true
            }
            Err(err) => {
                warn!(%err, "persisted credential is corrupt, waiting for /login");
                false
            }
        }
    }

    /// Build the provider authorization URL with a fresh CSRF state
    ///
    /// Invalidates any previously issued, unconsumed state.
    pub fn oauth_link(&self) -> String {
        let state = Uuid::new_v4().to_string();
        let url = Url::parse_with_params(
            &format!("{}/oauth", self.config.auth_base),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("state", state.as_str()),
                ("scope", SCOPE),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ],
        )
        .expect("auth base URL is valid");
        *self.pending_state.lock() = Some(state);
        url.into()
    }

    /// Exchange an authorization code for a credential
    ///
    /// Fails with [`CloudError::StateMismatch`] unless `state` equals the
    /// most recently issued link's state; a successful exchange consumes
    /// the state exactly once.
    pub async fn exchange_code(&self, code: &str, state: &str) -> Result<()> {
        {
            let mut pending = self.pending_state.lock();
            match pending.as_deref() {
                Some(expected) if expected == state => {
                    *pending = None;
                }
                _ => return Err(CloudError::StateMismatch),
            }
        }

        let credential = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.config.redirect_uri),
            ])
            .await?;
        info!(expires_at = %credential.expires_at, "authorization code exchanged");
        self.install(credential).await
    }

    /// Replace the credential via a refresh-token grant
    pub async fn refresh(&self) -> Result<()> {
        let refresh_token = self
            .credential
            .read()
            .as_ref()
            .map(|c| c.refresh_token.clone())
            .ok_or(CloudError::NotAuthorized)?;

        let credential = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
            ])
            .await?;
        info!(expires_at = %credential.expires_at, "credential refreshed");
        self.install(credential).await
    }

    /// Bearer header for provider calls
    ///
    /// A pure read: expiry is owned by the background refresh loop, not
    /// the call site.
    pub fn authorized_headers(&self) -> Result<HeaderMap> {
        let guard = self.credential.read();
        let credential = guard.as_ref().ok_or(CloudError::NotAuthorized)?;
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {}", credential.access_token))
            .map_err(|_| CloudError::NotAuthorized)?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    /// Refresh the credential one hour before every expiry, forever
    ///
    /// Spawned once at startup. While no credential exists the loop polls
    /// at a short interval; a credential already past its refresh deadline
    /// (e.g. loaded stale from disk) is refreshed immediately.
    pub async fn run_refresh_loop(self: Arc<Self>) {
        loop {
            let snapshot = self.credential.read().clone();
            let Some(credential) = snapshot else {
                tokio::time::sleep(UNAUTHENTICATED_POLL).await;
                continue;
            };

            let wait = credential.refresh_at() - Utc::now();
            if let Ok(wait) = wait.to_std() {
                info!(seconds = wait.as_secs(), "sleeping until credential refresh");
                tokio::time::sleep(wait).await;
            }

            if let Err(err) = self.refresh().await {
                warn!(%err, "credential refresh failed, retrying shortly");
                tokio::time::sleep(REFRESH_RETRY).await;
            }
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<Credential> {
        let url = format!("{}/oauth/access", self.config.auth_base);
        let value = self
            .transport
            .post_form(&url, form, self.basic_headers())
            .await?;
        let response: TokenResponse = serde_json::from_value(value)?;
        Ok(Credential::from_token_response(response, Utc::now()))
    }

    /// Persist the credential and publish it to the slot
    async fn install(&self, credential: Credential) -> Result<()> {
        let json = serde_json::to_string_pretty(&credential)?;
        tokio::fs::write(&self.config.credential_path, json)
            .await
            .map_err(|err| CloudError::Persist(err.to_string()))?;
        *self.credential.write() = Some(credential);
        Ok(())
    }

    /// HTTP Basic header from the client id/secret pair
    fn basic_headers(&self) -> HeaderMap {
        let token = BASE64.encode(format!(
            "{}:{}",
            self.config.client_id, self.config.client_secret
        ));
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Basic {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }
}
