mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;

use anyhow::{Context, Result};
use api::AppState;
use clap::Parser;
use config::Config;
use db::Database;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let auth = config.auth_service()?;
    let db = Database::open(&config.database)?;
    db.with_conn(|conn| {
        db::bootstrap_admin(
            conn,
            &auth.passwords,
            &config.admin_email,
            config.admin_password.as_deref(),
        )
    })?;

    let state = Arc::new(AppState { db, auth });
    let app = api::router(Arc::clone(&state)).layer(config.cors_layer()?);
    tokio::spawn(reload_on_hangup(config.clone(), state));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(
        address = %config.listen,
        database = %config.database.display(),
        enforce_roles = config.enforce_roles,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

/// Rotates the token signing key from the secret file on every SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(config: Config, state: Arc<AppState>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(hangups) => hangups,
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGHUP, key rotation disabled");
            return;
        }
    };
    while hangups.recv().await.is_some() {
        match config.reload_token_secret(&state.auth.tokens) {
            Ok(true) => info!("token signing key rotated"),
            Ok(false) => warn!("SIGHUP ignored: token secret was not given as a file"),
            Err(err) => warn!(error = %format!("{err:#}"), "token signing key kept"),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_config: Config, _state: Arc<AppState>) {}
