use axum::{Router, routing::get};

pub mod audit;
pub mod bulk_purchase_orders;
pub mod callbacks;
pub mod inquiries;
pub mod purchase_orders;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/inquiries", inquiries::router())
        .nest("/purchase-orders", purchase_orders::router())
        .nest("/bulk-purchase-orders", bulk_purchase_orders::router())
        .nest("/audit", audit::router())
}
