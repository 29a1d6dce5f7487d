//! pos-daemon entry point.
//!
//! This file is intentionally thin: it loads terminal configuration, starts
//! the supervisor, wires the operator HTTP surface, and waits for a signal
//! to shut everything down in order.

use std::sync::Arc;

use anyhow::Context;
use axum::http::Method;
use pos_config::TerminalConfig;
use pos_daemon::{routes, supervisor::Supervisor};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience: silent if the file does not exist, production
    // injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = TerminalConfig::load_from_env().context("loading terminal configuration")?;
    let terminal_id = config.terminal_id.clone();

    let supervisor = Supervisor::start(config).await.context("starting supervisor")?;
    let operator_port = supervisor.bound_port();
    let state = Arc::clone(&supervisor.state);

    let app = routes::build_router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
    .layer(operator_cors());

    // The operator HTTP surface listens one port above the peer fabric's
    // bound port, inside the same unprivileged range validated at startup.
    let http_addr = std::net::SocketAddr::from(([127, 0, 0, 1], operator_port.saturating_add(100)));
    info!(terminal_id = %terminal_id, addr = %http_addr, "pos-daemon operator surface listening");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    server.await.context("operator HTTP server crashed")?;

    supervisor.shutdown().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Operator surface is assumed to live on localhost/LAN, the same trust
/// boundary as the peer fabric (§4.7) — CORS is permissive rather than
/// absent so a local operator UI on a dev server port can still reach it.
fn operator_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
