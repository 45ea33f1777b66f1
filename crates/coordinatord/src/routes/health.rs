//! `GET /health`, unauthenticated.
//!
//! A shallow check always reports online; `?deep=true` additionally
//! probes the database and every registered transport, returning 500 the
//! moment either set reports an unhealthy member.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::HashMap;

use coordinator_protocol::http_types::{HealthQuery, HealthResponse};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>, Query(query): Query<HealthQuery>) -> Response {
    if !query.deep {
        return Json(HealthResponse {
            status: "online",
            databases: None,
            transports: None,
        })
        .into_response();
    }

    let db_healthy = state.job_store.health_check().await;
    let transports = state.transport_registry.health_check_all().await;

    let mut databases = HashMap::with_capacity(1);
    databases.insert("primary".to_string(), db_healthy);

    let unhealthy = !db_healthy || transports.values().any(|healthy| !healthy);
    let status = if unhealthy { "unhealthy" } else { "online" };
    let body = Json(HealthResponse {
        status,
        databases: Some(databases),
        transports: Some(transports),
    });

    if unhealthy {
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    } else {
        body.into_response()
    }
}
