//! HTTP surface of the service
//!
//! Thin and mechanical by design: every endpoint either redirects through
//! the OAuth dance or invokes one orchestrator operation. All endpoints
//! except the root banner sit behind a shared static password (plain
//! Basic auth, username ignored); failures surface through a single
//! rejection handler that maps each [`CloudError`] to a fixed status.

use std::convert::Infallible;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use sonos_cloud::{AuthManager, CloudError, DeviceDirectory, FavoritesCache};

use crate::orchestrator::Orchestrator;

/// Everything the route handlers need, constructed once at startup
pub struct AppContext {
    pub auth: Arc<AuthManager>,
    pub directory: Arc<DeviceDirectory>,
    pub favorites: Arc<FavoritesCache>,
    pub orchestrator: Arc<Orchestrator>,
    pub service_password: String,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

/// Rejection carrying a missing or wrong service password
#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Rejection carrying a core error for the boundary mapping
#[derive(Debug)]
struct ApiFault(CloudError);

impl warp::reject::Reject for ApiFault {}

fn fault(err: CloudError) -> Rejection {
    warp::reject::custom(ApiFault(err))
}

/// Build the complete route tree
pub fn routes(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let root = warp::path::end()
        .and(warp::get())
        .and(with_ctx(Arc::clone(&ctx)))
        .and_then(root_handler);

    let login = warp::path!("login")
        .and(warp::get())
        .and(guarded(Arc::clone(&ctx)))
        .and_then(login_handler);

    let callback = warp::path!("callback")
        .and(warp::get())
        .and(warp::query::<CallbackQuery>())
        .and(guarded(Arc::clone(&ctx)))
        .and_then(callback_handler);

    let toggle = warp::path!("toggle")
        .and(warp::get())
        .and(guarded(Arc::clone(&ctx)))
        .and_then(toggle_handler);

    let play = warp::path!("play")
        .and(warp::get())
        .and(guarded(Arc::clone(&ctx)))
        .and_then(play_handler);

    let pause = warp::path!("pause")
        .and(warp::get())
        .and(guarded(Arc::clone(&ctx)))
        .and_then(pause_handler);

    let sleep = warp::path!("sleep")
        .and(warp::get())
        .and(guarded(Arc::clone(&ctx)))
        .and_then(sleep_handler);

    // Unknown paths still sit behind the password: unauthenticated
    // probes get the 401 challenge, not a path oracle.
    let fallback = warp::any()
        .and(guarded(ctx))
        .and_then(fallback_handler);

    root.or(login)
        .or(callback)
        .or(toggle)
        .or(play)
        .or(pause)
        .or(sleep)
        .or(fallback)
        .recover(handle_rejection)
}

async fn fallback_handler(_ctx: Arc<AppContext>) -> Result<warp::reply::Response, Rejection> {
    Err(warp::reject::not_found())
}

fn with_ctx(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (Arc<AppContext>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&ctx))
}

/// Require the shared service password via Basic auth, username ignored
fn guarded(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (Arc<AppContext>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let ctx = Arc::clone(&ctx);
        async move {
            if password_matches(header.as_deref(), &ctx.service_password) {
                Ok(ctx)
            } else {
                Err(warp::reject::custom(Unauthorized))
            }
        }
    })
}

fn password_matches(header: Option<&str>, expected: &str) -> bool {
    let Some(encoded) = header.and_then(|h| h.strip_prefix("Basic ")) else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    // "user:password" with the user part ignored.
    match credentials.split_once(':') {
        Some((_, password)) => password == expected,
        None => false,
    }
}

fn redirect(location: String) -> impl Reply {
    warp::reply::with_header(
        warp::reply::with_status(warp::reply(), StatusCode::FOUND),
        "location",
        location,
    )
}

/// Service banner with a best-effort topology snapshot
async fn root_handler(ctx: Arc<AppContext>) -> Result<impl Reply, Rejection> {
    let household_id = ctx.directory.household_id().await.ok().flatten();
    let groups = ctx.directory.groups().await.ok();
    Ok(warp::reply::json(&serde_json::json!({
        "message": "Welcome to the Sonos home automation service",
        "household_id": household_id,
        "groups": groups,
    })))
}

async fn login_handler(ctx: Arc<AppContext>) -> Result<impl Reply, Rejection> {
    Ok(redirect(ctx.auth.oauth_link()))
}

async fn callback_handler(
    query: CallbackQuery,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Rejection> {
    ctx.auth
        .exchange_code(&query.code, &query.state)
        .await
        .map_err(fault)?;

    // Prime the topology now that calls can be authorized.
    if let Err(err) = ctx.directory.household_id().await {
        warn!(%err, "household lookup after login failed");
    }
    Ok(redirect("/".to_string()))
}

async fn toggle_handler(ctx: Arc<AppContext>) -> Result<impl Reply, Rejection> {
    ctx.orchestrator.toggle().await.map_err(fault)?;
    Ok("Ok")
}

async fn play_handler(ctx: Arc<AppContext>) -> Result<impl Reply, Rejection> {
    ctx.orchestrator.play_all().await.map_err(fault)?;
    Ok("Ok")
}

async fn pause_handler(ctx: Arc<AppContext>) -> Result<impl Reply, Rejection> {
    ctx.orchestrator.pause_all().await.map_err(fault)?;
    Ok("Ok")
}

async fn sleep_handler(ctx: Arc<AppContext>) -> Result<impl Reply, Rejection> {
    ctx.orchestrator.sleep_procedure().await.map_err(fault)?;
    Ok("Ok")
}

/// Map every handled failure onto its fixed status and message
async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if err.find::<Unauthorized>().is_some() {
        let reply = warp::reply::with_status("Authentication required", StatusCode::UNAUTHORIZED);
        let reply = warp::reply::with_header(reply, "www-authenticate", "Basic realm=\"sonos-home\"");
        return Ok(reply.into_response());
    }

    if let Some(ApiFault(fault)) = err.find::<ApiFault>() {
        let status = match fault {
            CloudError::NotAuthorized => StatusCode::UNAUTHORIZED,
            CloudError::StateMismatch => StatusCode::FORBIDDEN,
            CloudError::WriteNotAllowed => StatusCode::FORBIDDEN,
            CloudError::NoSleepPlayersFound => StatusCode::NOT_FOUND,
            CloudError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            CloudError::RetriesExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            // Swallowed by the orchestrator before reaching the boundary;
            // mapped defensively anyway.
            CloudError::UnknownTopology => StatusCode::OK,
            CloudError::Persist(_) | CloudError::Json(_) | CloudError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let reply = warp::reply::with_status(fault.to_string(), status);
        return Ok(reply.into_response());
    }

    if err.find::<warp::reject::InvalidQuery>().is_some() {
        return Ok(
            warp::reply::with_status("Missing or invalid query parameters", StatusCode::BAD_REQUEST)
                .into_response(),
        );
    }

    if err.is_not_found() {
        return Ok(warp::reply::with_status("Not found", StatusCode::NOT_FOUND).into_response());
    }

    warn!(?err, "unhandled rejection");
    Ok(
        warp::reply::with_status("Internal server error", StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Policy;
    use sonos_cloud::{AuthConfig, Transport};
    use std::time::Duration;

    fn context(tmp: &tempfile::TempDir) -> Arc<AppContext> {
        let transport = Transport::new(reqwest::Client::new(), false);
        let auth = Arc::new(AuthManager::new(
            AuthConfig {
                client_id: "client-id".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "http://localhost:8000/callback".to_string(),
                auth_base: "http://127.0.0.1:1".to_string(),
                credential_path: tmp.path().join("authorization.json"),
            },
            transport.clone(),
        ));
        let directory = Arc::new(DeviceDirectory::new(
            transport.clone(),
            Arc::clone(&auth),
            "http://127.0.0.1:1".to_string(),
        ));
        let favorites = Arc::new(FavoritesCache::new(
            transport.clone(),
            Arc::clone(&auth),
            Arc::clone(&directory),
            "http://127.0.0.1:1".to_string(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            transport,
            Arc::clone(&auth),
            Arc::clone(&directory),
            Arc::clone(&favorites),
            "http://127.0.0.1:1".to_string(),
            Policy {
                radio_favorite: None,
                sleep_favorite: None,
                sleep_room: "Bedroom".to_string(),
                sleep_volume: 8,
                sleep_delay: Duration::from_secs(60),
                day_volume: 25,
                night_volume: 12,
                day_start_hour: 8,
                day_end_hour: 22,
            },
        ));
        Arc::new(AppContext {
            auth,
            directory,
            favorites,
            orchestrator,
            service_password: "hunter2".to_string(),
        })
    }

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
    }

    #[test]
    fn test_password_matches_ignores_username() {
        assert!(password_matches(Some(&basic("", "pw")), "pw"));
        assert!(password_matches(Some(&basic("anyone", "pw")), "pw"));
        assert!(!password_matches(Some(&basic("user", "wrong")), "pw"));
        assert!(!password_matches(Some("Basic not-base64!!"), "pw"));
        assert!(!password_matches(Some("Bearer token"), "pw"));
        assert!(!password_matches(None, "pw"));
    }

    #[tokio::test]
    async fn test_guarded_endpoints_demand_the_password() {
        let tmp = tempfile::tempdir().unwrap();
        let routes = routes(context(&tmp));

        let res = warp::test::request().path("/login").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            res.headers()["www-authenticate"],
            "Basic realm=\"sonos-home\""
        );

        let res = warp::test::request()
            .path("/login")
            .header("authorization", basic("", "wrong"))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_root_is_open_and_answers() {
        let tmp = tempfile::tempdir().unwrap();
        let routes = routes(context(&tmp));

        let res = warp::test::request().path("/").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert!(body["message"].as_str().unwrap().contains("Sonos"));
        assert!(body["household_id"].is_null());
    }

    #[tokio::test]
    async fn test_login_redirects_to_provider() {
        let tmp = tempfile::tempdir().unwrap();
        let routes = routes(context(&tmp));

        let res = warp::test::request()
            .path("/login")
            .header("authorization", basic("", "hunter2"))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::FOUND);
        let location = res.headers()["location"].to_str().unwrap();
        assert!(location.contains("client_id=client-id"));
        assert!(location.contains("state="));
        assert!(location.contains("response_type=code"));
    }

    #[tokio::test]
    async fn test_unknown_paths_sit_behind_the_password() {
        let tmp = tempfile::tempdir().unwrap();
        let routes = routes(context(&tmp));

        let res = warp::test::request().path("/admin").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            res.headers()["www-authenticate"],
            "Basic realm=\"sonos-home\""
        );

        let res = warp::test::request()
            .path("/admin")
            .header("authorization", basic("", "hunter2"))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_callback_with_missing_params_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let routes = routes(context(&tmp));

        let res = warp::test::request()
            .path("/callback?code=abc")
            .header("authorization", basic("", "hunter2"))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_callback_with_mismatched_state_is_forbidden() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        ctx.auth.oauth_link();
        let routes = routes(ctx);

        let res = warp::test::request()
            .path("/callback?code=abc&state=not-the-one")
            .header("authorization", basic("", "hunter2"))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_toggle_without_credential_is_unauthorized() {
        let tmp = tempfile::tempdir().unwrap();
        let routes = routes(context(&tmp));

        let res = warp::test::request()
            .path("/toggle")
            .header("authorization", basic("", "hunter2"))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = String::from_utf8_lossy(res.body()).to_string();
        assert!(body.contains("/login"));
    }
}
