//! Liveness and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

use flowra_infra::{Outbox as _, RepairQueue as _};

use crate::app::AppState;
use crate::app::dto::{self, codes};

/// GET /health — 200 whenever the process is up.
pub async fn liveness() -> Response {
    dto::ok(json!({ "status": "ok" }))
}

/// GET /ready — 200 iff store, bus, and hub are all healthy.
pub async fn readiness(State(state): State<AppState>) -> Response {
    let store = state.services.store_healthy().await;
    let bus = state.services.bus_healthy().await;
    let hub = state.hub.is_running();

    if store && bus && hub {
        dto::ok(json!({ "status": "ready" }))
    } else {
        dto::error(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::STORAGE_UNAVAILABLE,
            format!("store={store} bus={bus} hub={hub}"),
        )
    }
}

/// GET /health/details — per-component status.
pub async fn details(State(state): State<AppState>) -> Response {
    let store = state.services.store_healthy().await;
    let bus = state.services.bus_healthy().await;
    let hub = state.hub.metrics();
    let outbox_backlog = state.services.outbox().count().await.ok();
    let repair = state.services.repair().stats().await.ok();

    dto::ok(json!({
        "mode": format!("{:?}", state.services.mode()).to_lowercase(),
        "store": { "healthy": store },
        "bus": { "healthy": bus },
        "hub": {
            "running": state.hub.is_running(),
            "clients": hub.clients,
            "delivered_frames": hub.delivered_frames,
            "dropped_frames": hub.dropped_frames,
            "dropped_clients": hub.dropped_clients,
        },
        "outbox": { "backlog": outbox_backlog },
        "repair": repair,
    }))
}
