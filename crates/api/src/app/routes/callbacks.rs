//! Gateway return legs. Unauthenticated: the buyer's browser lands here
//! after 3-D Secure, and the outcome is read back from the gateway.

use axum::{
    Router,
    extract::{Extension, Path},
    routing::get,
};

use inflow_core::{BulkPurchaseOrderId, PurchaseOrderId};
use inflow_infra::Engine;
use inflow_pricing::Milestone;

use crate::app::errors::{ApiResult, respond};

pub fn router() -> Router {
    Router::new()
        .route("/purchase-orders/:id/confirm", get(confirm_sample_payment))
        .route(
            "/bulk-purchase-orders/:id/:milestone/confirm",
            get(confirm_bulk_payment),
        )
}

pub async fn confirm_sample_payment(
    Extension(engine): Extension<Engine>,
    Path(id): Path<PurchaseOrderId>,
) -> ApiResult {
    respond(engine.samples.confirm_payment_callback(id).await)
}

pub async fn confirm_bulk_payment(
    Extension(engine): Extension<Engine>,
    Path((id, milestone)): Path<(BulkPurchaseOrderId, Milestone)>,
) -> ApiResult {
    respond(engine.bulk.confirm_payment_callback(id, milestone).await)
}
