//! dsr-daemon entry point.
//!
//! Loads config and secrets, sets up tracing, builds the shared state and
//! serves the router. Handlers live in `routes.rs`; shared state types live
//! in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use dsr_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

const DEFAULT_CONFIG: &str = "config/base.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths_from_env();
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = dsr_config::load_layered_yaml(&refs).context("load config")?;
    let cfg = loaded.pipeline()?;
    info!(config_hash = %loaded.config_hash, files = ?paths, "config loaded");

    let secrets = dsr_config::resolve_secrets(&cfg);
    let addr = bind_addr_from_env()
        .or_else(|| cfg.daemon.addr.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8000)));

    let factory = Arc::new(state::ConfigPipelineFactory::new(cfg, secrets));
    let shared =
        Arc::new(state::AppState::new(factory).with_config_hash(loaded.config_hash.clone()));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    info!("dsr-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&shared)))
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// `DSR_CONFIG`: comma-separated YAML files, later ones override earlier.
fn config_paths_from_env() -> Vec<String> {
    match std::env::var("DSR_CONFIG") {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => vec![DEFAULT_CONFIG.to_string()],
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("DSR_DAEMON_ADDR").ok()?.parse().ok()
}

/// Ctrl-C stops accepting requests and asks a running comparison to stop.
async fn shutdown_signal(st: Arc<state::AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler unavailable");
        return std::future::pending::<()>().await;
    }
    if st.runs.request_cancel() {
        info!("shutdown: running comparison cancelled");
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
        "http://localhost:8000",
        "http://127.0.0.1:8000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
