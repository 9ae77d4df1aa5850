//! Metrics collection and export for Courier.
//!
//! Counters live in [`BrokerStats`] and are mirrored to the `metrics`
//! crate. An optional HTTP server exposes them as JSON on `/stats` and in
//! Prometheus format on `/metrics`.

use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metric names.
pub mod names {
    pub const MESSAGES_SENT_TOTAL: &str = "courier_messages_sent_total";
    pub const FRAMES_RECEIVED_TOTAL: &str = "courier_frames_received_total";
    pub const ERRORS_TOTAL: &str = "courier_errors_total";
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "courier_subscriptions_active";
    pub const DESTINATIONS: &str = "courier_destinations";
}

/// Error kinds used as the `type` label on [`names::ERRORS_TOTAL`].
pub mod error_kind {
    /// A frame could not be parsed.
    pub const PARSE: &str = "parse";
    /// A frame parsed but could not be handled.
    pub const PROTOCOL: &str = "protocol";
    /// A MESSAGE could not be written to a subscriber.
    pub const DELIVERY: &str = "delivery";
    /// A reply could not be written to a client.
    pub const WRITE: &str = "write";
}

/// Describe all metrics.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::MESSAGES_SENT_TOTAL,
        "Total number of MESSAGE frames written to subscribers"
    );
    metrics::describe_counter!(
        names::FRAMES_RECEIVED_TOTAL,
        "Total number of frames received from clients"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of subscriptions"
    );
    metrics::describe_gauge!(names::DESTINATIONS, "Current number of destinations");

    info!("Metrics initialized");
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Broker-wide counters.
#[derive(Debug)]
pub struct BrokerStats {
    sent: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
    started: SystemTime,
}

/// Point-in-time copy of [`BrokerStats`], as served on `/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// MESSAGE frames written to subscribers.
    pub sent: u64,
    /// Frames received from clients.
    pub received: u64,
    /// Errors of any kind.
    pub errors: u64,
    /// Server start, unix seconds.
    pub server_start: u64,
    /// Snapshot time, unix seconds.
    pub timestamp: u64,
}

impl Default for BrokerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerStats {
    /// Create zeroed counters starting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: SystemTime::now(),
        }
    }

    /// Record a MESSAGE written to a subscriber.
    pub fn inc_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        counter!(names::MESSAGES_SENT_TOTAL).increment(1);
    }

    /// Record a frame received from a client.
    pub fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        counter!(names::FRAMES_RECEIVED_TOTAL).increment(1);
    }

    /// Record an error.
    pub fn inc_error(&self, kind: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(names::ERRORS_TOTAL, "type" => kind).increment(1);
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            server_start: unix_seconds(self.started),
            timestamp: unix_seconds(SystemTime::now()),
        }
    }
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Update the active subscription count.
pub fn set_active_subscriptions(count: usize) {
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(count as f64);
}

/// Update the destination count.
pub fn set_destinations(count: usize) {
    gauge!(names::DESTINATIONS).set(count as f64);
}

/// Shared state of the stats server.
#[derive(Clone)]
pub struct MetricsState {
    stats: Arc<BrokerStats>,
    prometheus: Option<PrometheusHandle>,
}

/// Build the stats router.
pub fn router(stats: Arc<BrokerStats>, prometheus: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(prometheus_handler))
        .with_state(MetricsState { stats, prometheus })
}

/// Install the Prometheus recorder and start the stats server.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or the address
/// cannot be bound.
pub async fn start_metrics_server(addr: &str, stats: Arc<BrokerStats>) -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {addr}"))?;

    info!("Metrics server listening on {}", addr);

    let app = router(stats, Some(handle));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server failed: {}", e);
        }
    });

    Ok(())
}

async fn stats_handler(State(state): State<MetricsState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn prometheus_handler(State(state): State<MetricsState>) -> String {
    state
        .prometheus
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}
