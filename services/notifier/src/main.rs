// notifier: real-time notification delivery and eviction engine.
//
// Wires together the store actor, the push-channel connection manager, the
// HTTP collaborator client and the localhost control API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, Command};
use notifier::alerts::LogAlerter;
use notifier::api::HttpNotificationApi;
use notifier::config::{self, NotifierConfig};
use notifier::control_api::{self, AppState};
use notifier::engine::NotificationEngine;
use notifier::model::Identity;
use tokio::sync::watch;
use tracing::{info, warn};

const API_STOP_GRACE: Duration = Duration::from_secs(5);

fn load(config_path: Option<&PathBuf>) -> Result<NotifierConfig, config::ConfigError> {
    match config_path {
        Some(path) => config::load_config_from_path(path),
        None => config::load_config(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "notifier starting");

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    let matches = Command::new("Glinax notifier")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time notification delivery and eviction engine")
        .arg(
            Arg::new("config")
                .help("Path to notifier.toml (defaults to the platform config dir)")
                .short('c')
                .long("config")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("user_id")
                .help("Signed-in user id; overrides [identity].user_id")
                .long("user-id"),
        )
        .arg(
            Arg::new("bind")
                .help("Control API bind address; overrides [control_api].bind")
                .long("bind"),
        )
        .get_matches();

    // -------------------------------------------------------------------------
    // 1. Config
    // -------------------------------------------------------------------------
    let cfg = match load(matches.get_one::<PathBuf>("config")) {
        Ok(cfg) => {
            info!(
                base_url = %cfg.server.base_url,
                push_url = %cfg.server.push_url,
                policy = ?cfg.eviction_policy,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let identity = match matches.get_one::<String>("user_id") {
        Some(user_id) => Some(Identity::new(
            user_id.clone(),
            cfg.identity.as_ref().and_then(|i| i.token.clone()),
        )),
        None => cfg.identity(),
    };
    if identity.is_none() {
        info!("no user identity configured; push channel stays idle");
    }
    let bind = matches
        .get_one::<String>("bind")
        .cloned()
        .unwrap_or_else(|| cfg.control_api.bind.clone());

    // The session provider side of the identity channel. Kept alive for the
    // whole process so the engine never sees the provider disappear.
    let (_identity_tx, identity_rx) = watch::channel(identity);

    // -------------------------------------------------------------------------
    // 2. Engine
    // -------------------------------------------------------------------------
    let api = match HttpNotificationApi::new(&cfg.server.base_url, identity_rx.clone()) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            eprintln!("FATAL: failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let alerter = Arc::new(LogAlerter::new(cfg.alerts.enabled));
    let engine = NotificationEngine::start(cfg.engine_settings(), identity_rx, api, alerter);

    // -------------------------------------------------------------------------
    // 3. Control API
    // -------------------------------------------------------------------------
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: failed to bind control API on {}: {}", bind, e);
            std::process::exit(1);
        }
    };
    let (api_shutdown_tx, api_shutdown_rx) = watch::channel(false);
    let state = AppState::new(
        engine.store().clone(),
        engine.connection_status(),
        api_shutdown_rx,
    );
    let server = tokio::spawn(control_api::serve(listener, state));

    // -------------------------------------------------------------------------
    // 4. Run until Ctrl-C
    // -------------------------------------------------------------------------
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");

    let _ = api_shutdown_tx.send(true);
    match tokio::time::timeout(API_STOP_GRACE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "control API stopped with error"),
        Ok(Err(e)) => warn!(error = %e, "control API task failed"),
        Err(_) => warn!("control API did not stop in time; continuing shutdown"),
    }
    engine.shutdown().await;
    info!("notifier stopped");
}
