//! Service configuration
//!
//! Every setting is a CLI flag with an environment variable fallback, so
//! the service runs unchanged from a shell, a unit file or a container.

use std::path::PathBuf;

use clap::Parser;

/// Sonos personal automation service
#[derive(Debug, Clone, Parser)]
#[command(name = "sonos-home", version, about)]
pub struct Config {
    /// OAuth client id issued by the Sonos developer portal
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: String,

    /// OAuth client secret
    #[arg(long, env = "CLIENT_SECRET")]
    pub client_secret: String,

    /// Redirect URI registered for the OAuth app
    #[arg(long, env = "REDIRECT_URI")]
    pub redirect_uri: String,

    /// Shared password protecting every endpoint except the root
    #[arg(long, env = "SERVICE_PASSWORD")]
    pub service_password: String,

    /// Permit mutating calls to the provider; off means read-only
    #[arg(long, env = "ALLOW_WRITE", default_value_t = false)]
    pub allow_write: bool,

    /// Port to serve on
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Where the OAuth credential is persisted
    #[arg(long, env = "CREDENTIAL_FILE", default_value = "authorization.json")]
    pub credential_file: PathBuf,

    /// Base URL of the Sonos login service
    #[arg(long, env = "AUTH_BASE", default_value = "https://api.sonos.com/login/v3")]
    pub auth_base: String,

    /// Base URL of the Sonos control API
    #[arg(
        long,
        env = "CONTROL_BASE",
        default_value = "https://api.ws.sonos.com/control/api/v1"
    )]
    pub control_base: String,

    /// Room name (substring, case-insensitive) of the sleep speakers
    #[arg(long, env = "SLEEP_ROOM", default_value = "Bedroom")]
    pub sleep_room: String,

    /// Volume used during the sleep procedure
    #[arg(long, env = "SLEEP_VOLUME", default_value_t = 8)]
    pub sleep_volume: u8,

    /// Minutes until the sleep timer pauses everything
    #[arg(long, env = "SLEEP_DURATION_MINUTES", default_value_t = 45)]
    pub sleep_duration_minutes: u64,

    /// Favorite loaded on a fresh toggle play
    #[arg(long, env = "RADIO_FAVORITE")]
    pub radio_favorite: Option<String>,

    /// Favorite loaded by the sleep procedure
    #[arg(long, env = "SLEEP_FAVORITE")]
    pub sleep_favorite: Option<String>,

    /// Volume during the daytime window
    #[arg(long, env = "DAY_VOLUME", default_value_t = 25)]
    pub day_volume: u8,

    /// Volume outside the daytime window
    #[arg(long, env = "NIGHT_VOLUME", default_value_t = 12)]
    pub night_volume: u8,

    /// Local hour (inclusive) at which the daytime volume starts
    #[arg(long, env = "DAY_START_HOUR", default_value_t = 8)]
    pub day_start_hour: u32,

    /// Local hour (exclusive) at which the daytime volume ends
    #[arg(long, env = "DAY_END_HOUR", default_value_t = 22)]
    pub day_end_hour: u32,
}
