//! Liveness and readiness probes

use axum::{extract::State, http::StatusCode, Json};
use cinema_common::VERSION;
use serde::Serialize;
use std::time::Instant;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub database: StoreCheck,
}

#[derive(Serialize)]
pub struct StoreCheck {
    pub up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: VERSION,
    })
}

/// 503 until the store answers a ping
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = Instant::now();

    let database = match state.repo.ping().await {
        Ok(()) => StoreCheck {
            up: true,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => StoreCheck {
            up: false,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let status = if database.up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if database.up { "ready" } else { "not_ready" },
            database,
        }),
    )
}
