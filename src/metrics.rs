//! Prometheus metrics
//!
//! Metric names live here so call sites stay one-liners.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub const ORDERS_SUBMITTED: &str = "orders_submitted_total";
pub const ORDERS_REJECTED: &str = "orders_rejected_total";
pub const ORDERS_CANCELLED: &str = "orders_cancelled_total";
pub const ORDERS_EXPIRED: &str = "orders_expired_total";
pub const TRADES_EXECUTED: &str = "trades_executed_total";
pub const MATCH_LATENCY: &str = "match_latency_seconds";

pub const BATCHES_FORMED: &str = "settlement_batches_formed_total";
pub const BATCHES_COMPLETED: &str = "settlement_batches_completed_total";
pub const BATCHES_FAILED: &str = "settlement_batches_failed_total";
pub const SETTLEMENT_RETRIES: &str = "settlement_submit_retries_total";
pub const SETTLEMENT_LATENCY: &str = "settlement_submit_latency_seconds";

pub const RESOLUTION_TRANSITIONS: &str = "market_resolution_transitions_total";
pub const ORACLE_ERRORS: &str = "oracle_errors_total";

/// Install the Prometheus recorder with its own HTTP listener
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}
