//! Process entry point: wire the cloud client stack together, start the
//! background refresh loops, and serve the HTTP surface.

mod config;
mod orchestrator;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sonos_cloud::{AuthConfig, AuthManager, DeviceDirectory, FavoritesCache, Transport};

use crate::config::Config;
use crate::orchestrator::{Orchestrator, Policy};
use crate::routes::AppContext;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    info!(
        port = config.port,
        allow_write = config.allow_write,
        "starting sonos-home"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let transport = Transport::new(client, config.allow_write);

    let auth = Arc::new(AuthManager::new(
        AuthConfig {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            auth_base: config.auth_base.clone(),
            credential_path: config.credential_file.clone(),
        },
        transport.clone(),
    ));
    if auth.load() {
        info!("loaded stored authorization");
    } else {
        info!("no stored authorization, visit /login to link an account");
    }

    let directory = Arc::new(DeviceDirectory::new(
        transport.clone(),
        Arc::clone(&auth),
        config.control_base.clone(),
    ));
    let favorites = Arc::new(FavoritesCache::new(
        transport.clone(),
        Arc::clone(&auth),
        Arc::clone(&directory),
        config.control_base.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        transport,
        Arc::clone(&auth),
        Arc::clone(&directory),
        Arc::clone(&favorites),
        config.control_base.clone(),
        Policy::from(&config),
    ));

    tokio::spawn(Arc::clone(&auth).run_refresh_loop());
    tokio::spawn(Arc::clone(&favorites).run_refresh_loop());

    let ctx = Arc::new(AppContext {
        auth,
        directory,
        favorites,
        orchestrator,
        service_password: config.service_password.clone(),
    });

    warp::serve(routes::routes(ctx))
        .run(([0, 0, 0, 0], config.port))
        .await;

    Ok(())
}
