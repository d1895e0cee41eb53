use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post, put},
};

use inflow_auth::Gate;
use inflow_core::{Actor, PurchaseOrderId};
use inflow_infra::Engine;
use inflow_infra::services::SampleCheckout;

use crate::app::dto;
use crate::app::errors::{ApiResult, respond, respond_with};
use crate::authz::guard;

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_purchase_order))
        .route("/:id/transactions", get(list_transactions))
        .route("/:id/cart-items", put(replace_cart_items))
        .route("/:id/preview", get(preview_checkout))
        .route("/:id/checkout", post(checkout))
        .route("/:id/mark-as-paid", post(mark_as_paid))
        .route("/:id/mark-as-unpaid", post(mark_as_unpaid))
        .route("/:id/tracking", post(advance_tracking))
        .route("/:id/assignees", put(assign_pic))
        .route("/:id/payment-link", post(create_payment_link))
        .route("/:id/bulk-purchase-order", post(create_bulk_order))
}

pub async fn get_purchase_order(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.samples.get(&actor, id).await)
}

pub async fn list_transactions(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.samples.transactions(&actor, id).await)
}

pub async fn replace_cart_items(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
    Json(body): Json<dto::CartItemsRequest>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.samples.replace_cart_items(&actor, id, body.items).await)
}

pub async fn preview_checkout(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
    Query(query): Query<dto::PreviewQuery>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.samples.preview_checkout(&actor, id, query.payment_type).await)
}

pub async fn checkout(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
    Json(body): Json<SampleCheckout>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.samples.checkout(&actor, id, body).await)
}

pub async fn mark_as_paid(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
    Json(body): Json<dto::MarkAsPaidRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.samples.mark_as_paid(&actor, id, body.recorded_amount).await)
}

pub async fn mark_as_unpaid(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
    Json(body): Json<dto::MarkAsUnpaidRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.samples.mark_as_unpaid(&actor, id, body.note).await)
}

pub async fn advance_tracking(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
    Json(body): Json<dto::SampleTrackingRequest>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.samples.advance_tracking(&actor, id, body.trigger).await)
}

pub async fn assign_pic(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
    Json(body): Json<dto::AssigneesRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.samples.assign_pic(&actor, id, body.assignee_ids).await)
}

pub async fn create_payment_link(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond_with(StatusCode::CREATED, engine.samples.create_payment_link(&actor, id).await)
}

pub async fn create_bulk_order(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
    body: Option<Json<dto::OptionalItemsRequest>>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    let items = body.and_then(|Json(body)| body.items);
    respond_with(
        StatusCode::CREATED,
        engine.samples.create_bulk_order(&actor, id, items).await,
    )
}
