// Main entry point - Dependency injection and server setup
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use race_telemetry_pipeline::application::connection_manager::ConnectionManager;
use race_telemetry_pipeline::application::history_service::HistoryService;
use race_telemetry_pipeline::application::live_pipeline::LivePipeline;
use race_telemetry_pipeline::application::playback::PlaybackController;
use race_telemetry_pipeline::application::playback_service::spawn_playback;
use race_telemetry_pipeline::application::time_series_store::TimeSeriesStore;
use race_telemetry_pipeline::domain::clock::{Clock, MonotonicClock};
use race_telemetry_pipeline::infrastructure::config::load_pipeline_config;
use race_telemetry_pipeline::infrastructure::http_history::HttpHistoryRepository;
use race_telemetry_pipeline::infrastructure::ws_transport::WsTransport;
use race_telemetry_pipeline::presentation::app_state::AppState;
use race_telemetry_pipeline::presentation::handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,race_telemetry_pipeline=debug")),
        )
        .init();

    // Load configuration
    let config = load_pipeline_config().context("Failed to load pipeline configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let cancel = CancellationToken::new();
    let session_store = Arc::new(Mutex::new(TimeSeriesStore::new(config.store.query_cache_size)));
    let live_store = Arc::new(Mutex::new(TimeSeriesStore::new(config.store.query_cache_size)));

    // Recorded session, if one is configured
    if let Some(session) = &config.history.session {
        let repository = Arc::new(HttpHistoryRepository::new(config.history.base_url.clone()));
        let history = HistoryService::new(repository, session_store.clone());
        if let Err(e) = history.load_session(session).await {
            tracing::warn!("Could not load session {}: {}", session, e);
        }
    }

    // Live stream: socket -> connection manager -> queues
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(
        config.connection.clone(),
        Box::new(WsTransport::new(events_tx)),
    );
    let (live, mut tasks) = LivePipeline::start(
        &config.queue,
        manager,
        events_rx,
        live_store.clone(),
        clock.clone(),
        cancel.clone(),
    );
    live.connection
        .connect()
        .await
        .context("Connection service failed to start")?;

    // Playback runs over the recorded session only
    let controller = PlaybackController::new(config.playback, session_store.lock().len());
    let (playback, playback_task) = spawn_playback(
        controller,
        session_store.clone(),
        Duration::from_millis(config.playback.tick_ms),
        cancel.clone(),
    );
    tasks.push(playback_task);

    let state = Arc::new(AppState {
        live,
        live_store,
        session_store,
        playback,
        sampling: config.sampling,
    });

    let router = Router::new()
        .route("/healthz", get(handlers::health_check))
        .route("/live/telemetry", get(handlers::live_telemetry))
        .route("/live/positions", get(handlers::live_positions))
        .route("/live/weather", get(handlers::live_weather))
        .route("/live/stream", get(handlers::live_stream))
        .route("/connection", get(handlers::connection_state))
        .route("/connection/connect", post(handlers::connect))
        .route("/connection/disconnect", post(handlers::disconnect))
        .route("/connection/reconnect", post(handlers::reconnect))
        .route("/history/query", get(handlers::history_query))
        .route("/history/at/:timestamp", get(handlers::history_at))
        .route("/history/series", get(handlers::history_series))
        .route(
            "/playback",
            get(handlers::playback_state).post(handlers::playback_command),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!("Starting race-telemetry-pipeline on {}", config.server.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Shutting down"),
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                cancel.cancelled().await;
            }
        },
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
