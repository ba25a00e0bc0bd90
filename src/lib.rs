//! lehrer-sync keeps teacher entries of an LDAP directory in sync with
//! school administration.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod ldap;
mod router;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::event::{EventPublisher, EventService};
use crate::ldap::{Ldap3Client, LdapClientService};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub ldap: Arc<LdapClientService>,
    pub metrics: PrometheusHandle,
}

impl FromRef<AppState> for Arc<LdapClientService> {
    fn from_ref(state: &AppState) -> Arc<LdapClientService> {
        Arc::clone(&state.ldap)
    }
}

impl FromRef<AppState> for PrometheusHandle {
    fn from_ref(state: &AppState) -> PrometheusHandle {
        state.metrics.clone()
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new().latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to `metrics`.
        .route("/metrics", get(router::metrics::metrics))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
    metrics: PrometheusHandle,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let Some(ldap_config) = config.ldap.clone() else {
        tracing::error!("missing `ldap` entry on `config.yaml` file");
        std::process::exit(1);
    };

    // handle event publishing.
    let events: Arc<dyn EventPublisher> = match &config.broker {
        Some(broker) => Arc::new(EventService::new(broker).await?),
        None => {
            tracing::warn!("no `broker` entry, domain events are dropped");
            Arc::new(EventService::default())
        },
    };

    let client = Ldap3Client::new(
        &ldap_config.url,
        ldap_config.connection_timeout(),
    );
    let ldap = LdapClientService::new(
        Arc::new(client),
        Arc::new(ldap_config),
        events,
    );

    Ok(AppState {
        config,
        ldap: Arc::new(ldap),
        metrics,
    })
}
