//! Prometheus scrape endpoint.

use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// Render every recorded metric in Prometheus text format.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
