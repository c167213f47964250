//! Depth Ladder - headless consumer
//!
//! Follows one symbol's depth stream through the store, mirrors the ladder
//! into Prometheus gauges and serves it over HTTP for dashboards.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use parking_lot::Mutex;
use prometheus::{register_gauge, register_int_counter, Encoder, Gauge, IntCounter, TextEncoder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use depth_ladder::{BookMetrics, Config, OrderbookStore, Snapshot, Status};

/// Application state shared across handlers
struct AppState {
    store: OrderbookStore,
    config: Arc<Config>,
}

/// Gauges mirroring the latest snapshot
struct LadderMetrics {
    best_bid: Gauge,
    best_ask: Gauge,
    spread_bps: Gauge,
    updates: IntCounter,
}

impl LadderMetrics {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            best_bid: register_gauge!("depth_ladder_best_bid", "Best bid price")?,
            best_ask: register_gauge!("depth_ladder_best_ask", "Best ask price")?,
            spread_bps: register_gauge!("depth_ladder_spread_bps", "Spread in basis points of mid")?,
            updates: register_int_counter!("depth_ladder_updates_total", "Ladder updates delivered")?,
        })
    }

    fn observe(&self, snapshot: &Snapshot) {
        if snapshot.status != Status::Connected {
            return;
        }
        let metrics = BookMetrics::from_snapshot(snapshot);
        if let Some(bid) = metrics.spread.best_bid {
            self.best_bid.set(bid);
        }
        if let Some(ask) = metrics.spread.best_ask {
            self.best_ask.set(ask);
        }
        if let Some(bps) = metrics.spread_bps {
            self.spread_bps.set(bps);
        }
        self.updates.inc();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Depth Ladder");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(symbol = %config.symbol, endpoint = %config.ws_endpoint, "Configuration loaded");

    let store = OrderbookStore::new(config.store_config());
    let metrics = LadderMetrics::register()?;

    let last_status = Mutex::new(Status::Idle);
    let reader = store.clone();
    let _subscription = store.subscribe(move || {
        let snapshot = reader.get_snapshot();
        metrics.observe(&snapshot);

        let mut last = last_status.lock();
        if *last != snapshot.status {
            info!(
                symbol = ?snapshot.symbol,
                status = snapshot.status.label(),
                error = ?snapshot.error,
                "Order book status changed"
            );
            *last = snapshot.status;
        }
    });

    store.connect(&config.symbol);

    let state = Arc::new(AppState {
        store: store.clone(),
        config: config.clone(),
    });

    let server = tokio::spawn(async move {
        if let Err(e) = start_health_server(state).await {
            warn!(error = %e, "Health server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    store.disconnect();
    server.abort();

    Ok(())
}

/// Start HTTP server for health checks, the live ladder and metrics
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.http_port));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/snapshot", get(snapshot))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.store.get_snapshot();
    let health = match snapshot.status {
        Status::Error => "degraded",
        _ => "healthy",
    };
    Json(serde_json::json!({
        "status": health,
        "component": "depth-ladder",
        "stream": snapshot.status.label(),
        "symbol": snapshot.symbol,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn snapshot(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.store.get_snapshot();
    let metrics = BookMetrics::from_snapshot(&snapshot);
    Json(serde_json::json!({
        "snapshot": &*snapshot,
        "metrics": metrics,
    }))
}

async fn metrics() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
