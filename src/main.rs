//! Depth Pulse - market depth analytics service
//!
//! Runs the depth pipeline against the live Binance stream, logs the derived
//! analytics and serves them over HTTP to the presentation layer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::{mpsc, watch};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use depth_pulse::{
    BinanceConnector, Config, FeedError, Instrument, PipelineController, PipelineMetrics,
    PipelineState, ReconnectingConnector,
};

/// State shared with the HTTP handlers
#[derive(Clone)]
struct AppState {
    state_rx: watch::Receiver<PipelineState>,
    history_window: chrono::Duration,
    metrics: Arc<PipelineMetrics>,
    switch_tx: mpsc::Sender<Instrument>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Depth Pulse");

    let config = Config::load()?;
    info!(
        instrument = %config.instrument,
        depth = config.depth_levels,
        speed_ms = config.update_speed_ms,
        "Configuration loaded"
    );

    let metrics = Arc::new(PipelineMetrics::new()?);
    let connector = ReconnectingConnector::new(
        Arc::new(BinanceConnector::new(config.feed_settings())),
        config.reconnect_policy(),
    )
    .with_metrics(metrics.clone());

    let mut controller = PipelineController::new(
        Arc::new(connector),
        config.instrument,
        config.history_config(),
        Some(metrics.clone()),
    );

    let (switch_tx, mut switch_rx) = mpsc::channel(16);
    let app_state = AppState {
        state_rx: controller.subscribe(),
        history_window: config.history_config().window,
        metrics,
        switch_tx,
    };

    let http_port = config.http_port;
    tokio::spawn(async move {
        if let Err(e) = start_http_server(app_state, http_port).await {
            warn!(error = %e, "HTTP server error");
        }
    });

    controller.start();

    let mut status = tokio::time::interval(Duration::from_secs(config.status_interval_secs.max(1)));
    let mut expiry = tokio::time::interval(Duration::from_secs(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            Some(instrument) = switch_rx.recv() => controller.switch_instrument(instrument),
            _ = status.tick() => log_status(&controller.state()),
            _ = expiry.tick() => controller.expire_history(chrono::Utc::now()),
        }
    }

    controller.shutdown();
    Ok(())
}

fn log_status(state: &PipelineState) {
    match &state.snapshot {
        Some(snapshot) => info!(
            pair = %state.label,
            phase = ?state.phase,
            best_bid = ?snapshot.best_bid().map(|l| l.price),
            best_ask = ?snapshot.best_ask().map(|l| l.price),
            spread = %state.spread,
            spread_bps = ?state.metrics().and_then(|m| m.spread_bps),
            imbalance_pct = ?state.imbalance_percent(),
            history_len = state.spread_history.len(),
            updates = state.updates,
            "Order book status"
        ),
        None => info!(
            pair = %state.label,
            phase = ?state.phase,
            last_error = ?state.last_error,
            "Awaiting depth data"
        ),
    }
}

/// Start HTTP server for health checks, state and metrics
async fn start_http_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/state", get(current_state))
        .route("/metrics", get(metrics))
        .route("/instrument/:code", post(select_instrument))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(app): State<AppState>) -> Json<serde_json::Value> {
    let (instrument, phase) = {
        let state = app.state_rx.borrow();
        (state.instrument, state.phase)
    };
    Json(serde_json::json!({
        "status": "healthy",
        "component": "depth-pulse",
        "instrument": instrument,
        "phase": phase,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn current_state(State(app): State<AppState>) -> Json<PipelineState> {
    let mut state = app.state_rx.borrow().clone();
    state.retain_history_within(chrono::Utc::now(), app.history_window);
    Json(state)
}

async fn metrics(State(app): State<AppState>) -> Result<String, StatusCode> {
    app.metrics.render().map_err(|e| {
        warn!(error = %e, "Failed to render metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn select_instrument(
    State(app): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let instrument: Instrument = code
        .parse()
        .map_err(|e: FeedError| (StatusCode::BAD_REQUEST, e.to_string()))?;
    app.switch_tx
        .send(instrument)
        .await
        .map_err(|_| (StatusCode::SERVICE_UNAVAILABLE, "pipeline stopped".to_string()))?;
    Ok(StatusCode::ACCEPTED)
}
