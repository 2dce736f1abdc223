//! The CRUD-shaped collaborator surface, answered with 501.

use axum::http::StatusCode;
use axum::response::Response;

use crate::app::dto::{self, codes};

pub async fn not_implemented() -> Response {
    dto::error(
        StatusCode::NOT_IMPLEMENTED,
        codes::NOT_IMPLEMENTED,
        "this endpoint is not part of the core surface",
    )
}
