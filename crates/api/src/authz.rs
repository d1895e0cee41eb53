//! Route-level role gates.
//!
//! Coarse checks before a service is called. Ownership and visibility are
//! decided by the lifecycle services.

use axum::http::StatusCode;
use axum::response::Response;

use inflow_auth::{Gate, authorize};
use inflow_core::Actor;

use crate::app::errors::json_error;

pub fn guard(actor: &Actor, gate: Gate) -> Result<(), Response> {
    authorize(actor, gate).map_err(|e| json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}
