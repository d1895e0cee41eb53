use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use inflow_core::Actor;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(actor): Extension<Actor>) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": actor.id.to_string(),
        "role": actor.role,
    }))
}
