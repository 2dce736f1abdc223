pub mod health;
pub mod stubs;
pub mod ws;

use axum::Router;
use axum::routing::get;

use crate::app::AppState;

pub fn router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/ws", get(ws::upgrade))
        .fallback(stubs::not_implemented);

    Router::new()
        .route("/health", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/health/details", get(health::details))
        .nest("/api/v1", api_v1)
        .route("/auth/*path", axum::routing::any(stubs::not_implemented))
        .with_state(state)
}
