//! OAuth credential record

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Raw token endpoint response, both grants
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: String,
    pub expires_in: i64,
}

/// The OAuth credential for the Sonos cloud API
///
/// One credential exists per process. It is persisted as a single JSON
/// record (ISO-8601 UTC `expires_at`) on every update and overwritten in
/// place, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: String,
    /// Absolute expiry instant, derived from the grant's `expires_in`
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// How long before expiry the background refresh replaces the credential
    const REFRESH_MARGIN_HOURS: i64 = 1;

    pub(crate) fn from_token_response(resp: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            token_type: resp.token_type,
            scope: resp.scope,
            expires_at: now + Duration::seconds(resp.expires_in),
        }
    }

    /// The instant at which the background loop must refresh this credential
    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.expires_at - Duration::hours(Self::REFRESH_MARGIN_HOURS)
    }

    /// Whether the refresh deadline has already passed
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_at()
    }
}
