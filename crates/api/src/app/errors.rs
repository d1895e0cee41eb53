use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use inflow_infra::{LifecycleError, LifecycleResult};

/// Handlers answer with a response either way; `Err` short-circuits via `?`.
pub type ApiResult = Result<Response, Response>;

pub fn lifecycle_error_to_response(err: LifecycleError) -> Response {
    match err {
        LifecycleError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        LifecycleError::InvalidState(msg) | LifecycleError::AlreadyPaid(msg) => json_error(
            StatusCode::CONFLICT,
            "step_unavailable",
            format!("this step is no longer available: {msg}"),
        ),
        LifecycleError::LockTimeout(_) => json_error(
            StatusCode::LOCKED,
            "order_busy",
            "the order is being updated, try again shortly",
        ),
        LifecycleError::Pricing(err) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_pricing_input", err.to_string())
        }
        LifecycleError::Gateway(err) => {
            warn!(error = %err, "payment gateway failure");
            json_error(StatusCode::BAD_GATEWAY, "payment_failed", "payment failed, please retry")
        }
        LifecycleError::PersistenceConflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        LifecycleError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        LifecycleError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
        LifecycleError::EditTimeoutExpired => json_error(
            StatusCode::CONFLICT,
            "edit_timeout_expired",
            "the edit window has expired",
        ),
        LifecycleError::Store(err) => {
            error!(error = %err, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal error")
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// `200` with the value as JSON, or the mapped error.
pub fn respond<T: Serialize>(result: LifecycleResult<T>) -> ApiResult {
    respond_with(StatusCode::OK, result)
}

pub fn respond_with<T: Serialize>(status: StatusCode, result: LifecycleResult<T>) -> ApiResult {
    match result {
        Ok(value) => Ok((status, Json(value)).into_response()),
        Err(err) => Err(lifecycle_error_to_response(err)),
    }
}
