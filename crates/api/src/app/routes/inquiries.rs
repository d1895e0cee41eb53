use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post, put},
};

use inflow_auth::Gate;
use inflow_core::{Actor, InquiryId};
use inflow_infra::Engine;
use inflow_infra::services::{NewInquiry, QuotationInput};

use crate::app::dto;
use crate::app::errors::{ApiResult, respond, respond_with};
use crate::authz::guard;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_inquiry))
        .route("/:id", get(get_inquiry))
        .route("/:id/purchase-order", get(get_sample_order))
        .route("/:id/quotation", post(submit_quotation))
        .route("/:id/quotation/approve", post(approve_quotation))
        .route("/:id/quotation/reject", post(reject_quotation))
        .route("/:id/close", post(close_inquiry))
        .route("/:id/cancel", post(cancel_inquiry))
        .route("/:id/attachments", put(update_attachments))
        .route("/:id/edit-timeout", put(update_edit_timeout))
        .route("/:id/assignees", put(assign_pic))
}

pub async fn create_inquiry(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<NewInquiry>,
) -> ApiResult {
    guard(&actor, Gate::Buyer)?;
    respond_with(StatusCode::CREATED, engine.inquiries.create(&actor, body).await)
}

pub async fn get_inquiry(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.inquiries.get(&actor, id).await)
}

pub async fn get_sample_order(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.samples.find_for_inquiry(&actor, id).await)
}

pub async fn submit_quotation(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
    Json(body): Json<QuotationInput>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.inquiries.submit_quotation(&actor, id, body).await)
}

pub async fn approve_quotation(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.inquiries.approve_quotation(&actor, id).await)
}

pub async fn reject_quotation(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
    Json(body): Json<dto::RejectQuotationRequest>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.inquiries.reject_quotation(&actor, id, body.reason).await)
}

pub async fn close_inquiry(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
    Json(body): Json<dto::ReasonRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.inquiries.close(&actor, id, body.reason).await)
}

pub async fn cancel_inquiry(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
    Json(body): Json<dto::ReasonRequest>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.inquiries.cancel(&actor, id, body.reason).await)
}

pub async fn update_attachments(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
    Json(body): Json<dto::AttachmentsRequest>,
) -> ApiResult {
    guard(&actor, Gate::AdminOrBuyer)?;
    respond(engine.inquiries.update_attachments(&actor, id, body.attachments).await)
}

pub async fn update_edit_timeout(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
    Json(body): Json<dto::EditTimeoutRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.inquiries.update_edit_timeout(&actor, id, body.edit_timeout).await)
}

pub async fn assign_pic(
    Extension(engine): Extension<Engine>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InquiryId>,
    Json(body): Json<dto::AssigneesRequest>,
) -> ApiResult {
    guard(&actor, Gate::Admin)?;
    respond(engine.inquiries.assign_pic(&actor, id, body.assignee_ids).await)
}
