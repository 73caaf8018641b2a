//! # Healarr Server
//!
//! Media-library health service: detects corrupt video files under
//! configured scan roots, optionally drives remediation through Sonarr/
//! Radarr/Whisparr/Lidarr, and exposes the life-cycle over REST+WebSocket.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use healarr_config::{load_from_env, CliArgs};
use healarr_core::database::postgres::run_migrations;

use healarr_server::app_state::AppState;
use healarr_server::background::{
    reap_idle_rate_limiters, relay_events_to_ws_hub, sweep_verification_timeouts,
};
use healarr_server::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = args.apply(load_from_env()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healarr_server=info,healarr_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_target(true))
        .init();

    if config.metadata.dry_run {
        warn!("starting in dry-run mode: no remediation or filesystem mutation will occur");
    }

    if args.dump_config {
        println!("{config:#?}");
        return Ok(());
    }

    info!(
        host = %config.server.host,
        port = config.server.port,
        "loading configuration"
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database.url)
        .await?;
    info!("connected to database");

    run_migrations(&pool).await?;
    info!("schema migrations applied");

    let state = AppState::new(config.clone(), pool).await?;

    // Dangling `running` scans from an unclean shutdown are finalised before
    // the server starts accepting new work (spec §4.4, §7).
    let recovered = state.scan_engine.recover_interrupted_scans().await?;
    if recovered > 0 {
        warn!(count = recovered, "recovered dangling scans as failed/interrupted");
    }

    tokio::spawn(relay_events_to_ws_hub(state.clone()));

    let sweep_interval = Duration::from_secs(
        (config.remediation.verification_interval_minutes.max(1) as u64) * 60,
    );
    tokio::spawn(sweep_verification_timeouts(state.clone(), sweep_interval));
    tokio::spawn(reap_idle_rate_limiters(
        state.clone(),
        Duration::from_secs(5 * 60),
    ));

    let app = build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, "starting Healarr server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.shutdown.cancel();
    state.ws_hub.shutdown().await;
    state.bus.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}
