use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use inflow_core::{Actor, Attachment, Currency, InquiryId, PurchaseOrderId, UserId};
use inflow_inquiry::{CreateInquiry, Inquiry, InquiryCommand, SubmitQuotation};
use inflow_pricing::{PricingSnapshot, Quotation};
use inflow_purchasing::{CreatePurchaseOrder, PurchaseOrder, PurchaseOrderCommand};

use crate::audit::AuditSubject;
use crate::error::{LifecycleError, LifecycleResult};
use crate::lock::inquiry_key;

use super::sample::SampleOrderService;
use super::{EngineContext, LineInput, into_items, reference, require_admin, require_owner_or_admin};

#[derive(Debug, Clone, Deserialize)]
pub struct NewInquiry {
    pub title: String,
    #[serde(default)]
    pub specification: Value,
    pub currency: Currency,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Defaults to creation time plus 24 hours.
    #[serde(default)]
    pub edit_timeout: Option<DateTime<Utc>>,
    /// Lines of the sample order created alongside the inquiry.
    #[serde(default)]
    pub sample_items: Vec<LineInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedInquiry {
    pub inquiry: Inquiry,
    pub sample_order: PurchaseOrder,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotationInput {
    pub quotations: Vec<Quotation>,
    #[serde(default)]
    pub shipping_fee: Decimal,
    #[serde(default)]
    pub tax_percentage: Decimal,
    #[serde(default)]
    pub product_weight: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotedInquiry {
    pub inquiry: Inquiry,
    /// Sample pricing refreshed by the quotation; `None` when the sample
    /// could not be priced yet (for example an empty cart).
    pub sample_pricing: Option<PricingSnapshot>,
}

#[derive(Debug, Clone)]
pub struct InquiryService {
    ctx: Arc<EngineContext>,
    samples: SampleOrderService,
}

impl InquiryService {
    pub(crate) fn new(ctx: Arc<EngineContext>, samples: SampleOrderService) -> Self {
        Self { ctx, samples }
    }

    /// Creates the inquiry together with its sample order.
    #[instrument(skip(self, input), fields(buyer_id = %actor.id), err)]
    pub async fn create(&self, actor: &Actor, input: NewInquiry) -> LifecycleResult<CreatedInquiry> {
        if !actor.is_buyer() {
            return Err(LifecycleError::Unauthorized);
        }
        let now = Utc::now();
        let inquiry_id = InquiryId::new();
        let created = self
            .ctx
            .inquiries
            .execute(
                &inquiry_id,
                &InquiryCommand::Create(CreateInquiry {
                    inquiry_id,
                    reference_id: reference::inquiry(),
                    buyer_id: actor.id,
                    title: input.title,
                    specification: input.specification,
                    currency: input.currency,
                    quantity: input.quantity,
                    attachments: input.attachments,
                    edit_timeout: input.edit_timeout,
                    occurred_at: now,
                }),
                || Inquiry::empty(inquiry_id),
            )
            .await?;

        let order_id = PurchaseOrderId::new();
        let sample = self
            .ctx
            .purchase_orders
            .execute(
                &order_id,
                &PurchaseOrderCommand::Create(CreatePurchaseOrder {
                    order_id,
                    reference_id: reference::purchase_order(),
                    inquiry_id,
                    buyer_id: actor.id,
                    currency: input.currency,
                    items: into_items(input.sample_items),
                    occurred_at: now,
                }),
                || PurchaseOrder::empty(order_id),
            )
            .await;
        let sample = match sample {
            Ok(sample) => sample,
            Err(err) => {
                // An inquiry without its sample order is unusable.
                if let Err(cleanup) = self.ctx.inquiries.store().delete(&inquiry_id).await {
                    error!(%inquiry_id, error = %cleanup, "orphaned inquiry left behind");
                }
                return Err(err);
            }
        };

        self.ctx
            .record(AuditSubject::Inquiry(inquiry_id), Some(inquiry_id), Some(actor.id), &created.events)
            .await;
        self.ctx
            .record(AuditSubject::PurchaseOrder(order_id), Some(inquiry_id), Some(actor.id), &sample.events)
            .await;
        info!(%inquiry_id, purchase_order_id = %order_id, "inquiry created");

        Ok(CreatedInquiry {
            inquiry: created.aggregate,
            sample_order: sample.aggregate,
        })
    }

    pub async fn get(&self, actor: &Actor, id: InquiryId) -> LifecycleResult<Inquiry> {
        self.load_visible(actor, id).await
    }

    /// Admin quotation. Also refreshes the sample pricing.
    #[instrument(skip(self, input), fields(inquiry_id = %id), err)]
    pub async fn submit_quotation(
        &self,
        actor: &Actor,
        id: InquiryId,
        input: QuotationInput,
    ) -> LifecycleResult<QuotedInquiry> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(inquiry_key(id), self.ctx.config.preview_lock_timeout)
            .await?;

        let inquiry = self.load_visible(actor, id).await?;
        let inquiry = self
            .execute(
                actor.id,
                inquiry,
                InquiryCommand::SubmitQuotation(SubmitQuotation {
                    admin_id: actor.id,
                    quotations: input.quotations,
                    shipping_fee: input.shipping_fee,
                    tax_percentage: input.tax_percentage,
                    product_weight: input.product_weight,
                    occurred_at: Utc::now(),
                }),
            )
            .await?;

        let sample_pricing = match self.samples.reprice_for_inquiry(actor, id).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(inquiry_id = %id, error = %err, "sample not repriced after quotation");
                None
            }
        };

        Ok(QuotedInquiry {
            inquiry,
            sample_pricing,
        })
    }

    #[instrument(skip(self), fields(inquiry_id = %id), err)]
    pub async fn approve_quotation(&self, actor: &Actor, id: InquiryId) -> LifecycleResult<Inquiry> {
        let inquiry = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, inquiry.buyer_id())?;
        self.execute(
            actor.id,
            inquiry,
            InquiryCommand::ApproveQuotation {
                approver_id: actor.id,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    #[instrument(skip(self, reason), fields(inquiry_id = %id), err)]
    pub async fn reject_quotation(
        &self,
        actor: &Actor,
        id: InquiryId,
        reason: String,
    ) -> LifecycleResult<Inquiry> {
        let inquiry = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, inquiry.buyer_id())?;
        self.execute(
            actor.id,
            inquiry,
            InquiryCommand::RejectQuotation {
                rejector_id: actor.id,
                reason,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn close(
        &self,
        actor: &Actor,
        id: InquiryId,
        reason: Option<String>,
    ) -> LifecycleResult<Inquiry> {
        require_admin(actor)?;
        let inquiry = self.load_visible(actor, id).await?;
        self.execute(
            actor.id,
            inquiry,
            InquiryCommand::Close {
                reason,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn cancel(
        &self,
        actor: &Actor,
        id: InquiryId,
        reason: Option<String>,
    ) -> LifecycleResult<Inquiry> {
        let inquiry = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, inquiry.buyer_id())?;
        self.execute(
            actor.id,
            inquiry,
            InquiryCommand::Cancel {
                reason,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Buyer edits are refused after the edit deadline; admins are not.
    pub async fn update_attachments(
        &self,
        actor: &Actor,
        id: InquiryId,
        attachments: Vec<Attachment>,
    ) -> LifecycleResult<Inquiry> {
        let inquiry = self.load_visible(actor, id).await?;
        self.execute(
            actor.id,
            inquiry,
            InquiryCommand::UpdateAttachments {
                actor: *actor,
                attachments,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn update_edit_timeout(
        &self,
        actor: &Actor,
        id: InquiryId,
        edit_timeout: DateTime<Utc>,
    ) -> LifecycleResult<Inquiry> {
        require_admin(actor)?;
        let inquiry = self.load_visible(actor, id).await?;
        self.execute(
            actor.id,
            inquiry,
            InquiryCommand::UpdateEditTimeout {
                edit_timeout,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn assign_pic(
        &self,
        actor: &Actor,
        id: InquiryId,
        assignee_ids: Vec<UserId>,
    ) -> LifecycleResult<Inquiry> {
        require_admin(actor)?;
        let inquiry = self.load_visible(actor, id).await?;
        self.execute(
            actor.id,
            inquiry,
            InquiryCommand::AssignPic {
                assignee_ids,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    async fn load_visible(&self, actor: &Actor, id: InquiryId) -> LifecycleResult<Inquiry> {
        let inquiry = self.ctx.inquiries.load(&id).await?;
        let visible = actor.is_admin() || (actor.is_buyer() && inquiry.buyer_id() == Some(actor.id));
        if !visible || inquiry.is_deleted() {
            return Err(LifecycleError::NotFound);
        }
        Ok(inquiry)
    }

    async fn execute(
        &self,
        actor_id: UserId,
        inquiry: Inquiry,
        command: InquiryCommand,
    ) -> LifecycleResult<Inquiry> {
        let id = inquiry.id_typed();
        let outcome = self.ctx.inquiries.execute_on(inquiry, &command).await?;
        self.ctx
            .record(AuditSubject::Inquiry(id), Some(id), Some(actor_id), &outcome.events)
            .await;
        Ok(outcome.aggregate)
    }
}
