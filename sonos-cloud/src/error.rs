//! Error types for the Sonos cloud client

use thiserror::Error;

/// Result type for sonos-cloud operations
pub type Result<T> = std::result::Result<T, CloudError>;

/// Errors that can occur while talking to the Sonos cloud API
///
/// Every fallible operation in this crate returns one of these variants.
/// The HTTP boundary of the service maps each variant to a fixed status
/// code in a single exhaustive match; anything that is not a `CloudError`
/// is an unhandled fault.
#[derive(Debug, Error)]
pub enum CloudError {
    /// No usable credential is present; the user must visit /login
    #[error("Missing authorization, go to /login")]
    NotAuthorized,

    /// The state returned from the OAuth callback did not match the issued one
    #[error("The state returned from the OAuth process did not match source state")]
    StateMismatch,

    /// A mutating call was attempted while the write gate is disabled
    #[error("Writes to Sonos are disabled on this instance")]
    WriteNotAllowed,

    /// The provider answered with a non-2xx status
    ///
    /// Not retried: a semantic rejection, not transience.
    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// A connect or read timeout persisted past the final retry attempt
    #[error("{url} exceeded retries: {source}")]
    RetriesExceeded {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The sleep procedure matched no players by room name
    #[error("No players matching the sleep room were found")]
    NoSleepPlayersFound,

    /// The provider reported zero groups
    ///
    /// Benign: callers that depend on topology treat this as "nothing to
    /// do" rather than a failure.
    #[error("The household reported no groups")]
    UnknownTopology,

    /// Credential could not be written to disk
    #[error("Credential persistence failed: {0}")]
    Persist(String),

    /// A provider response did not decode into the expected shape
    #[error("Malformed provider response: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level failure other than a timeout
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<std::io::Error> for CloudError {
    fn from(err: std::io::Error) -> Self {
        CloudError::Persist(err.to_string())
    }
}
