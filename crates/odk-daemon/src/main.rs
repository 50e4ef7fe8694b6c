//! odk-daemon entry point.
//!
//! Thin: loads config, resolves secrets (fail fast), connects and migrates
//! the database, wires middleware, and starts the HTTP server. All route
//! handlers live in `routes.rs`; shared state lives in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderName, HeaderValue, Method};
use odk_config::{load_layered_yaml, resolve_secrets, unused_leaf_pointers, ServiceSettings};
use odk_daemon::{notify::LogNotifier, provider::StripeProvider, routes, state::AppState};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

const ENV_CONFIG_PATHS: &str = "ODK_CONFIG_PATHS";
const DEFAULT_CONFIG_PATH: &str = "config/base.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths_raw = std::env::var(ENV_CONFIG_PATHS).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let paths: Vec<&str> = paths_raw.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    let loaded = load_layered_yaml(&paths).context("config load failed")?;
    for pointer in unused_leaf_pointers(&loaded.config_json) {
        warn!(pointer = %pointer, "config key is not consumed by odk-daemon");
    }

    let settings = ServiceSettings::from_config_json(&loaded.config_json)?;
    let secrets = resolve_secrets(&loaded.config_json)?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let pool = odk_db::connect_from_env().await?;
    odk_db::migrate(&pool).await?;

    let provider = Arc::new(StripeProvider::new_with_base_url(
        secrets.provider_api_key.clone(),
        settings.provider_base_url.clone(),
    ));
    let cors = cors_for_origin(&settings.public_base_url);
    let addr = settings.bind_addr;

    let shared = Arc::new(AppState::new(
        settings,
        &secrets,
        pool,
        provider,
        Arc::new(LogNotifier),
    )?);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    info!("odk-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
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

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
}

/// CORS: only the public site may call the API from a browser. Localhost is
/// always allowed for development.
fn cors_for_origin(public_base_url: &str) -> CorsLayer {
    let allowed_origins = [
        public_base_url.trim_end_matches('/'),
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .expose_headers([HeaderName::from_static("x-csrf-token")])
}
