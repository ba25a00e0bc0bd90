//! Public server status.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::config::Configuration;
use crate::ldap::LdapClientService;

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Up,
    Down,
}

/// Structured status.
#[derive(Serialize)]
pub struct Status {
    version: String,
    name: String,
    ldap: Reachability,
}

/// Server version and LDAP reachability.
///
/// Answers `503 Service Unavailable` when the directory refuses the bind.
pub async fn status(
    State(config): State<Arc<Configuration>>,
    State(ldap): State<Arc<LdapClientService>>,
) -> (StatusCode, Json<Status>) {
    let (code, reachability) = match ldap.check_connection().await {
        Ok(()) => (StatusCode::OK, Reachability::Up),
        Err(err) => {
            tracing::warn!(error = %err, "ldap unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, Reachability::Down)
        },
    };

    let name = if config.name.is_empty() {
        env!("CARGO_CRATE_NAME").to_owned()
    } else {
        config.name.clone()
    };

    (
        code,
        Json(Status {
            version: env!("CARGO_PKG_VERSION").into(),
            name,
            ldap: reachability,
        }),
    )
}
