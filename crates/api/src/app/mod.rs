//! HTTP application wiring (Axum router + engine wiring).
//!
//! - `services.rs`: builds the lifecycle engine from configuration
//! - `routes/`: handlers, one file per resource
//! - `dto.rs`: request bodies that are not service inputs already
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use inflow_infra::Engine;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let engine = services::build_engine(config).await?;
    Ok(build_router(engine, &config.jwt_secret))
}

/// Router over an already built engine.
pub fn build_router(engine: Engine, jwt_secret: &str) -> Router {
    let jwt = Arc::new(inflow_auth::Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require a bearer token.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    let api = Router::new()
        .merge(protected)
        .nest("/callback/payment-intents", routes::callbacks::router());

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", api)
        .layer(ServiceBuilder::new().layer(Extension(engine)))
}
