mod api;
mod auth;
mod catalog;
mod config;
mod error;
mod job_store;
mod matching;
mod models;
mod persist;
mod pipeline;
mod progress;
mod search_cache;
mod sweeper;
mod transfer;
mod youtube;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use config::Config;
use job_store::JobStore;
use pipeline::Pipeline;
use progress::ProgressHub;
use search_cache::SearchCache;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Pipeline,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playlist_migrate_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    persist::ensure_dir(&config.cache_path).await?;

    let jobs = Arc::new(JobStore::open(config.job_store_settings()).await?);
    let cache = Arc::new(SearchCache::open(config.search_cache_settings()).await);
    let progress = Arc::new(ProgressHub::new(config.progress_buffer));
    let pipeline = Pipeline::new(
        Arc::clone(&jobs),
        Arc::clone(&cache),
        progress,
        config.pipeline_settings(),
    );

    sweeper::spawn_job_sweeper(Arc::clone(&jobs), config.job_sweep_interval, config.job_retention);
    sweeper::spawn_cache_sweeper(Arc::clone(&cache), config.cache_sweep_interval);

    let state = AppState {
        config: config.clone(),
        pipeline,
    };

    let app = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/v1/config", get(api::get_config))
        .route("/v1/jobs", post(api::create_job))
        .route("/v1/jobs/{job_id}", get(api::get_job))
        .route("/v1/jobs/{job_id}/analyze", post(api::reanalyze_job))
        .route(
            "/v1/jobs/{job_id}/tracks/{track_index}/manual",
            post(api::set_manual_override),
        )
        .route("/v1/jobs/{job_id}/transfer", post(api::start_transfer))
        .route("/v1/sessions/{session_id}/jobs", get(api::list_session_jobs))
        .route("/v1/progress/{session_id}", get(api::progress_stream))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("playlist-migrate-api listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(err) = cache.flush().await {
        warn!("Failed to flush search cache on shutdown: {err:#}");
    }
    info!("playlist-migrate-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
