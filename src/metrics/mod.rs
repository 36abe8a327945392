//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - RPC health and wallet chain switches
//! - Balance discovery
//! - Quote requests, outcomes and discarded responses
//! - Name resolution and route execution

use crate::chain::ChainId;
use crate::error::{BridgeError, BridgeResult};
use crate::events::SessionEvent;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "porta_chain_connected",
        "RPC connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_SWITCHES: CounterVec = register_counter_vec!(
        "porta_chain_switches_total",
        "Wallet chain switch attempts by result",
        &["chain_id", "result"]
    ).unwrap();

    // Balance metrics
    pub static ref BALANCE_FETCHES: CounterVec = register_counter_vec!(
        "porta_balance_fetches_total",
        "Per-token balance fetches by result",
        &["chain_id", "result"]
    ).unwrap();

    pub static ref BALANCE_DISCOVERY_LATENCY: HistogramVec = register_histogram_vec!(
        "porta_balance_discovery_seconds",
        "Time to discover all balances for a chain",
        &["chain_id"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // Quote metrics
    pub static ref QUOTE_REQUESTS: CounterVec = register_counter_vec!(
        "porta_quote_requests_total",
        "Quote requests issued after the debounce window",
        &["from_chain", "to_chain"]
    ).unwrap();

    pub static ref QUOTE_OUTCOMES: CounterVec = register_counter_vec!(
        "porta_quote_outcomes_total",
        "Applied quote outcomes by kind",
        &["outcome"]
    ).unwrap();

    pub static ref QUOTE_DISCARDED: CounterVec = register_counter_vec!(
        "porta_quote_discarded_total",
        "Quote responses dropped because the selection moved on",
        &[]
    ).unwrap();

    pub static ref QUOTE_LATENCY: HistogramVec = register_histogram_vec!(
        "porta_quote_latency_seconds",
        "Quote request latency",
        &[],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Resolution metrics
    pub static ref NAME_RESOLUTIONS: CounterVec = register_counter_vec!(
        "porta_name_resolutions_total",
        "Recipient name resolutions by outcome",
        &["outcome"]
    ).unwrap();

    // Execution metrics
    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "porta_executions_total",
        "Route executions by outcome",
        &["from_chain", "to_chain", "outcome"]
    ).unwrap();

    pub static ref EXECUTION_LATENCY: HistogramVec = register_histogram_vec!(
        "porta_execution_latency_seconds",
        "Route execution latency",
        &["from_chain"],
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).unwrap();

    // Session events
    pub static ref SESSION_EVENTS: CounterVec = register_counter_vec!(
        "porta_session_events_total",
        "Session notifications by type",
        &["event_type"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| BridgeError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Encode every registered metric in the text exposition format
pub fn render() -> BridgeResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| BridgeError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| BridgeError::Internal(e.to_string()))
}

fn result_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: ChainId, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_chain_switch(chain_id: ChainId, success: bool) {
    CHAIN_SWITCHES
        .with_label_values(&[&chain_id.to_string(), result_label(success)])
        .inc();
}

pub fn record_balance_fetch(chain_id: ChainId, success: bool) {
    BALANCE_FETCHES
        .with_label_values(&[&chain_id.to_string(), result_label(success)])
        .inc();
}

pub fn record_balance_discovery(chain_id: ChainId, latency_secs: f64) {
    BALANCE_DISCOVERY_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_quote_request(from_chain: ChainId, to_chain: ChainId) {
    QUOTE_REQUESTS
        .with_label_values(&[&from_chain.to_string(), &to_chain.to_string()])
        .inc();
}

pub fn record_quote_outcome(outcome: &str, latency_secs: f64) {
    QUOTE_OUTCOMES.with_label_values(&[outcome]).inc();
    QUOTE_LATENCY.with_label_values(&[]).observe(latency_secs);
}

pub fn record_quote_discarded() {
    QUOTE_DISCARDED.with_label_values(&[]).inc();
}

pub fn record_name_resolution(outcome: &str) {
    NAME_RESOLUTIONS.with_label_values(&[outcome]).inc();
}

pub fn record_execution(from_chain: ChainId, to_chain: ChainId, success: bool, latency_secs: f64) {
    let from = from_chain.to_string();
    EXECUTIONS
        .with_label_values(&[&from, &to_chain.to_string(), result_label(success)])
        .inc();
    EXECUTION_LATENCY
        .with_label_values(&[&from])
        .observe(latency_secs);
}

pub fn record_event(event: &SessionEvent) {
    SESSION_EVENTS.with_label_values(&[event.name()]).inc();
}
