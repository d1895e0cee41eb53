use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post, put},
};

use inflow_auth::Gate;
use inflow_bulk::{ChecklistKind, FinalPaymentTerms};
use inflow_core::{Actor, BulkPurchaseOrderId, PurchaseOrderId};
use inflow_infra::Engine;
use inflow_infra::services::{BulkCheckout, BulkQuotationInput, ChecklistInput, DepositInput, QcInput};
use inflow_pricing::Milestone;

use crate::app::dto;
use crate::app::errors::{ApiResult, respond, respond_with};
use crate::authz::guard;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_bulk_orders))
        .route("/import", post(import_bulk_orders))
        .route("/preview", post(preview_many))
        .route("/by-sample/:purchase_order_id", get(find_for_sample))
        .route("/:id", get(get_bulk_order))
        .route("/:id/transactions", get(list_transactions))
        .route("/:id/request-submission", post(request_submission))
        .route("/:id/submit", post(submit_order))
        .route("/:id/quotation", post(send_quotation))
        .route("/:id/preview/:milestone", get(preview_checkout))
        .route("/:id/checkout/:milestone", post(checkout))
        .route("/:id/mark-as-paid/:milestone", post(mark_as_paid))
        .route("/:id/mark-as-unpaid/:milestone", post(mark_as_unpaid))
        .route("/:id/payment-link/:milestone", post(create_payment_link))
        .route("/:id/second-payment", post(request_second_payment))
        .route("/:id/checklists/:kind", put(upsert_checklist))
        .route("/:id/raw-material/approve", post(approve_raw_material))
        .route("/:id/qc-reports", post(create_qc_report))
        .route("/:id/submit-goods", post(submit_goods))
        .route("/:id/final-payment", post(mark_final_payment))
        .route("/:id/delivering", post(mark_delivering))
        .route("/:id/delivered", post(mark_delivered))
        .route("/:id/confirm-delivered", post(confirm_delivered))
        .route("/:id/deposits", post(create_deposit))
        .route("/:id/tracking", post(advance_tracking))
        .route("/:id/reset", post(reset))
        .route("/:id/seller", put(assign_seller))
        .route("/:id/seller-quotations", post(submit_seller_quotation))
        .route("/:id/seller-response", post(respond_to_po))
        .route("/:id/seller-tracking", post(advance_seller_tracking))
        .route("/:id/assignees", put(assign_pic))
}

pub async fn list_bulk_orders(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
) -> ApiResult {
    respond(engine.bulk.list_visible(&actor).await)
}

pub async fn import_bulk_orders(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<dto::ImportRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.import(&actor, body.rows).await)
}

pub async fn preview_many(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<dto::PreviewManyRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.preview_many(&actor, body.ids).await)
}

pub async fn find_for_sample(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(purchase_order_id): Path<PurchaseOrderId>,
) -> ApiResult {
    respond(engine.bulk.find_for_sample(&actor, purchase_order_id).await)
}

pub async fn get_bulk_order(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
) -> ApiResult {
    respond(engine.bulk.get(&actor, id).await)
}

pub async fn list_transactions(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.bulk.transactions(&actor, id).await)
}

pub async fn request_submission(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.request_submission(&actor, id).await)
}

pub async fn submit_order(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    body: Option<Json<dto::OptionalItemsRequest>>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    let items = body.and_then(|Json(body)| body.items);
    respond(engine.bulk.submit_order(&actor, id, items).await)
}

pub async fn send_quotation(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<BulkQuotationInput>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.send_quotation(&actor, id, body).await)
}

pub async fn preview_checkout(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path((id, milestone)): Path<(BulkPurchaseOrderId, Milestone)>,
    Query(query): Query<dto::PreviewQuery>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(
        engine
            .bulk
            .preview_checkout(&actor, id, milestone, query.payment_type)
            .await,
    )
}

pub async fn checkout(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path((id, milestone)): Path<(BulkPurchaseOrderId, Milestone)>,
    Json(body): Json<BulkCheckout>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.bulk.checkout(&actor, id, milestone, body).await)
}

pub async fn mark_as_paid(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path((id, milestone)): Path<(BulkPurchaseOrderId, Milestone)>,
    Json(body): Json<dto::MarkAsPaidRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(
        engine
            .bulk
            .mark_as_paid(&actor, id, milestone, body.recorded_amount)
            .await,
    )
}

pub async fn mark_as_unpaid(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path((id, milestone)): Path<(BulkPurchaseOrderId, Milestone)>,
    Json(body): Json<dto::MarkAsUnpaidRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.mark_as_unpaid(&actor, id, milestone, body.note).await)
}

pub async fn create_payment_link(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path((id, milestone)): Path<(BulkPurchaseOrderId, Milestone)>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond_with(
        StatusCode::CREATED,
        engine.bulk.create_payment_link(&actor, id, milestone).await,
    )
}

pub async fn request_second_payment(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.request_second_payment(&actor, id).await)
}

pub async fn upsert_checklist(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path((id, kind)): Path<(BulkPurchaseOrderId, ChecklistKind)>,
    Json(body): Json<ChecklistInput>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrSeller)?;
    respond(engine.bulk.upsert_checklist(&actor, id, kind, body).await)
}

pub async fn approve_raw_material(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<dto::ApproveRawMaterialRequest>,
) -> ApiResult {
    guard(&actor, Gate::Buyer)?;
    respond(
        engine
            .bulk
            .buyer_approve_raw_material(&actor, id, body.item_ids)
            .await,
    )
}

pub async fn create_qc_report(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<QcInput>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrSeller)?;
    respond_with(StatusCode::CREATED, engine.bulk.create_qc_report(&actor, id, body).await)
}

pub async fn submit_goods(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrSeller)?;
    respond(engine.bulk.submit_goods(&actor, id).await)
}

pub async fn mark_final_payment(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<FinalPaymentTerms>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.mark_final_payment(&actor, id, body).await)
}

pub async fn mark_delivering(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<dto::DeliveringRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.mark_delivering(&actor, id, body.logistic_info).await)
}

pub async fn mark_delivered(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.mark_delivered(&actor, id).await)
}

pub async fn confirm_delivered(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.bulk.confirm_delivered(&actor, id).await)
}

pub async fn create_deposit(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<DepositInput>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond_with(StatusCode::CREATED, engine.bulk.create_deposit(&actor, id, body).await)
}

pub async fn advance_tracking(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<dto::BulkTrackingRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.advance_tracking(&actor, id, body.target).await)
}

pub async fn reset(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.reset(&actor, id).await)
}

pub async fn assign_seller(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<dto::AssignSellerRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.assign_seller(&actor, id, body.seller).await)
}

pub async fn submit_seller_quotation(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<dto::SellerQuotationRequest>,
) -> ApiResult {
    guard(&actor, Gate::Seller)?;
    respond(
        engine
            .bulk
            .submit_seller_quotation(&actor, id, body.price, body.lead_time_days)
            .await,
    )
}

pub async fn respond_to_po(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<dto::SellerResponseRequest>,
) -> ApiResult {
    guard(&actor, Gate::Seller)?;
    respond(engine.bulk.respond_to_po(&actor, id, body.accept).await)
}

pub async fn advance_seller_tracking(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<dto::SellerTrackingRequest>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrSeller)?;
    respond(engine.bulk.advance_seller_tracking(&actor, id, body.target).await)
}

pub async fn assign_pic(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
    Json(body): Json<dto::AssigneesRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.bulk.assign_pic(&actor, id, body.assignee_ids).await)
}
