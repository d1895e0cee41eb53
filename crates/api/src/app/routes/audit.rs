use axum::{
    Json, Router,
    extract::{Extension, Path},
    routing::{get, patch},
};

use inflow_auth::Gate;
use inflow_core::{Actor, AuditRecordId, BulkPurchaseOrderId, InquiryId, PurchaseOrderId};
use inflow_infra::Engine;
use inflow_infra::audit::AuditSubject;

use crate::app::dto;
use crate::app::errors::{ApiResult, respond};
use crate::authz::guard;

pub fn router() -> Router {
    Router::new()
        .route("/inquiries/:id", get(inquiry_history))
        .route("/purchase-orders/:id", get(purchase_order_history))
        .route("/bulk-purchase-orders/:id", get(bulk_order_history))
        .route("/records/:id", patch(annotate_record))
}

async fn history(engine: &Engine, actor: &Actor, subject: AuditSubject) -> ApiResult {
    guard(actor, Gate::Admin)?;
    respond(engine.audit_history(actor, subject).await)
}

pub async fn inquiry_history(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
) -> ApiResult {
    history(&engine, &actor, AuditSubject::Inquiry(id)).await
}

pub async fn purchase_order_history(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PurchaseOrderId>,
) -> ApiResult {
    history(&engine, &actor, AuditSubject::PurchaseOrder(id)).await
}

pub async fn bulk_order_history(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<BulkPurchaseOrderId>,
) -> ApiResult {
    history(&engine, &actor, AuditSubject::BulkPurchaseOrder(id)).await
}

pub async fn annotate_record(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AuditRecordId>,
    Json(body): Json<dto::AnnotateAuditRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.annotate_audit(&actor, id, body.notes, body.attachments).await)
}
