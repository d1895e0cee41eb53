//! Bulk purchase order lifecycle: quotation, milestone payments, deposits,
//! production checklists, delivery and the seller lane.
//!
//! Pricing, checkout and settlement of one order run under
//! `bulk_purchase_order_{id}`. Batch operations fan out through a
//! [`BoundedPool`] and report per-row results.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use inflow_bulk::{
    BulkPurchaseOrder, BulkPurchaseOrderCommand, BulkTrackingStatus, ChecklistItem, ChecklistKind,
    ChecklistStatus, CreateBulkPurchaseOrder, FinalPaymentTerms, QcReport, QcStatus, SellerRef,
    SellerTrackingStatus, SendQuotation, payment_route,
};
use inflow_core::{
    Actor, Attachment, BulkPurchaseOrderId, ChecklistItemId, PurchaseOrderId, UserId,
};
use inflow_payments::{
    GatewayError, IntentRequest, IntentStatus, LinkRequest, NewTransaction, OrderRef,
    PaymentIntent, PaymentLink, PaymentTransaction, TransactionStatus,
};
use inflow_pricing::{BulkPricing, CartItem, Milestone, MilestonePlan, PaymentType, Quotation};
use inflow_purchasing::PurchaseOrder;

use crate::audit::AuditSubject;
use crate::error::{LifecycleError, LifecycleResult};
use crate::lock::bulk_purchase_order_key;
use crate::pool::BoundedPool;

use super::{
    CallbackOutcome, CheckoutOutcome, EngineContext, LineInput, into_items, link_lines, metadata,
    reference, require_admin, require_owner_or_admin,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkCheckout {
    #[serde(default)]
    pub payment_type: PaymentType,
    #[serde(default)]
    pub transaction_ref_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkQuotationInput {
    pub quotations: Vec<Quotation>,
    /// Zero skips the first payment and starts production right away.
    pub first_percentage: u32,
    #[serde(default)]
    pub second_percentage: u32,
    #[serde(default)]
    pub tax_percentage: Decimal,
    #[serde(default)]
    pub shipping_fee: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChecklistInput {
    /// Present when updating an existing item.
    #[serde(default)]
    pub id: Option<ChecklistItemId>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ChecklistStatus,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QcInput {
    pub status: QcStatus,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositInput {
    pub amount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
    /// Money already received; otherwise the deposit waits for confirmation.
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub transaction_ref_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// One row of a bulk import: the paid sample to derive from, and optionally
/// the bulk lines. Empty lines copy the sample's.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRow {
    pub purchase_order_id: PurchaseOrderId,
    #[serde(default)]
    pub items: Vec<LineInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub row: usize,
    pub purchase_order_id: PurchaseOrderId,
    pub bulk_purchase_order_id: Option<BulkPurchaseOrderId>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewOutcome {
    pub bulk_purchase_order_id: BulkPurchaseOrderId,
    pub pricing: Option<BulkPricing>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BulkOrderService {
    ctx: Arc<EngineContext>,
}

impl BulkOrderService {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, actor: &Actor, id: BulkPurchaseOrderId) -> LifecycleResult<BulkPurchaseOrder> {
        self.load_visible(actor, id).await
    }

    /// Every order the caller may see, oldest first.
    pub async fn list_visible(&self, actor: &Actor) -> LifecycleResult<Vec<BulkPurchaseOrder>> {
        Ok(self
            .ctx
            .bulk_orders
            .store()
            .list()
            .await?
            .into_iter()
            .filter(|order| order.is_visible_to(actor))
            .collect())
    }

    pub async fn find_for_sample(
        &self,
        actor: &Actor,
        purchase_order_id: PurchaseOrderId,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        let order = self
            .ctx
            .bulk_orders
            .store()
            .find_by_key("purchase_order_id", &purchase_order_id.to_string())
            .await?
            .filter(|order| order.is_visible_to(actor))
            .ok_or(LifecycleError::NotFound)?;
        Ok(order)
    }

    pub async fn transactions(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
    ) -> LifecycleResult<Vec<PaymentTransaction>> {
        let order = self.load_visible(actor, id).await?;
        Ok(self.ctx.transactions.list_for_order(&order_ref(&order)?).await?)
    }

    pub async fn request_submission(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::RequestSubmission {
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Buyer confirms the lines, optionally replacing them.
    pub async fn submit_order(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        lines: Option<Vec<LineInput>>,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        let order = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, order.buyer_id())?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::SubmitOrder {
                items: lines.map(into_items),
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Admin quotation with the milestone plan; prices the order right away.
    #[instrument(skip(self, input), fields(bulk_purchase_order_id = %id), err)]
    pub async fn send_quotation(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        input: BulkQuotationInput,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let plan = MilestonePlan::new(input.first_percentage, input.second_percentage)?;
        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.preview_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        let order = dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::SendQuotation(SendQuotation {
                admin_id: actor.id,
                quotations: input.quotations,
                plan,
                tax_percentage: input.tax_percentage,
                shipping_fee: input.shipping_fee,
                occurred_at: Utc::now(),
            }),
        )
        .await?;
        if plan.skips_first_payment() {
            info!("first payment skipped, production can start");
        }
        let (order, _) = reprice(&self.ctx, order, None, Some(actor.id)).await?;
        Ok(order)
    }

    /// Prices the order with `payment_type` at `milestone` and stores it.
    #[instrument(skip(self), fields(bulk_purchase_order_id = %id), err)]
    pub async fn preview_checkout(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        milestone: Milestone,
        payment_type: PaymentType,
    ) -> LifecycleResult<BulkPricing> {
        let order = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, order.buyer_id())?;
        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.preview_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        let (_, pricing) = reprice(&self.ctx, order, Some((milestone, payment_type)), Some(actor.id)).await?;
        Ok(pricing)
    }

    #[instrument(
        skip(self, input),
        fields(bulk_purchase_order_id = %id, %milestone, payment_type = ?input.payment_type),
        err
    )]
    pub async fn checkout(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        milestone: Milestone,
        input: BulkCheckout,
    ) -> LifecycleResult<CheckoutOutcome> {
        let order = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, order.buyer_id())?;

        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        order.ensure_payable(milestone)?;
        let payment_type = input.payment_type;
        let (order, pricing) =
            reprice(&self.ctx, order, Some((milestone, payment_type)), Some(actor.id)).await?;
        let amount = pricing.amount_due(milestone);
        let route = payment_route(milestone, payment_type);

        match payment_type {
            PaymentType::BankTransfer => {
                let now = Utc::now();
                let order = dispatch(
                    &self.ctx,
                    Some(actor.id),
                    order,
                    BulkPurchaseOrderCommand::SubmitBankTransfer {
                        milestone,
                        payer_id: actor.id,
                        transaction_ref_id: input.transaction_ref_id.clone(),
                        attachments: input.attachments.clone(),
                        occurred_at: now,
                    },
                )
                .await?;
                let transaction = PaymentTransaction::record(NewTransaction {
                    reference_id: reference::transaction(),
                    order: order_ref(&order)?,
                    payer_id: actor.id,
                    amount,
                    currency: pricing.currency,
                    milestone,
                    payment_percentage: order.plan().percentage(milestone),
                    payment_type,
                    status: route.checkout_status,
                    transaction_ref_id: input.transaction_ref_id,
                    attachments: input.attachments,
                    payment_intent_id: None,
                    note: None,
                    created_at: now,
                });
                self.ctx.transactions.insert(&transaction).await?;
                info!(reference_id = %transaction.reference_id, "bank transfer awaiting confirmation");
                Ok(CheckoutOutcome::AwaitingConfirmation { transaction })
            }
            PaymentType::Card => {
                if amount <= Decimal::ZERO {
                    return Err(LifecycleError::validation(format!("nothing to pay at {milestone}")));
                }
                let request = IntentRequest {
                    amount: pricing.currency.to_smallest_unit(amount)?,
                    currency: pricing.currency,
                    customer_ref: actor.id.to_string(),
                    payment_method_id: input.payment_method_id,
                    metadata: metadata([
                        ("bulk_purchase_order_id", id.to_string()),
                        ("reference_id", order.reference_id().to_string()),
                        ("milestone", milestone.to_string()),
                    ]),
                };
                let mut intent = self.ctx.gateway.create_payment_intent(request).await?;
                if intent.status == IntentStatus::RequiresConfirmation {
                    let return_url = self.ctx.config.bulk_order_return_url(id, milestone);
                    intent = self
                        .ctx
                        .gateway
                        .confirm_payment_intent(&intent.id, &return_url)
                        .await?;
                }
                self.settle_intent(order, milestone, intent, actor.id).await
            }
        }
    }

    /// Gateway return leg of a milestone card payment.
    #[instrument(skip(self), fields(bulk_purchase_order_id = %id, %milestone), err)]
    pub async fn confirm_payment_callback(
        &self,
        id: BulkPurchaseOrderId,
        milestone: Milestone,
    ) -> LifecycleResult<CallbackOutcome> {
        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        if order.is_settled(milestone) {
            return Ok(CallbackOutcome::Paid { transaction: None });
        }
        let intent_id = order
            .milestone(milestone)
            .and_then(|state| state.payment_intent_id.clone())
            .ok_or_else(|| {
                LifecycleError::invalid_state(format!("no card payment in progress for {milestone}"))
            })?;

        let intent = self.ctx.gateway.retrieve_payment_intent(&intent_id).await?;
        match intent.status {
            IntentStatus::Succeeded => {
                let payer_id = order.buyer_id().ok_or(LifecycleError::NotFound)?;
                let transaction = self
                    .complete_card_payment(order, milestone, &intent.id, payer_id)
                    .await?;
                Ok(CallbackOutcome::Paid {
                    transaction: Some(transaction),
                })
            }
            status => {
                info!(payment_intent_id = %intent_id, status = status.as_str(), "card payment not settled yet");
                Ok(CallbackOutcome::Unsettled { status })
            }
        }
    }

    /// Admin confirmation of a milestone or deposit payment.
    #[instrument(skip(self), fields(bulk_purchase_order_id = %id, %milestone), err)]
    pub async fn mark_as_paid(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        milestone: Milestone,
        recorded_amount: Option<Decimal>,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        let expected = order.amount_due(milestone);
        let now = Utc::now();
        let order = dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::MarkAsPaid {
                milestone,
                admin_id: actor.id,
                recorded_amount,
                occurred_at: now,
            },
        )
        .await?;
        if milestone != Milestone::Deposit {
            if let Some(recorded) = recorded_amount.filter(|amount| *amount != expected) {
                warn!(%expected, %recorded, "recorded amount differs from the amount due");
            }
        }

        let order_ref = order_ref(&order)?;
        match self
            .ctx
            .transactions
            .find_pending(&order_ref, milestone, PaymentType::BankTransfer)
            .await?
        {
            Some(mut transaction) => {
                let loaded = transaction.version;
                transaction.mark_paid(now)?;
                self.ctx.transactions.save(&transaction, loaded).await?;
            }
            None if milestone != Milestone::Deposit => {
                let payment_type = order
                    .milestone(milestone)
                    .map(|state| state.payment_type)
                    .unwrap_or_default();
                let transaction = PaymentTransaction::record(NewTransaction {
                    reference_id: reference::transaction(),
                    order: order_ref,
                    payer_id: order.buyer_id().unwrap_or(actor.id),
                    amount: recorded_amount.unwrap_or(expected),
                    currency: order.currency(),
                    milestone,
                    payment_percentage: order.plan().percentage(milestone),
                    payment_type,
                    status: TransactionStatus::Paid,
                    transaction_ref_id: None,
                    attachments: vec![],
                    payment_intent_id: None,
                    note: Some("marked as paid by admin".into()),
                    created_at: now,
                });
                self.ctx.transactions.insert(&transaction).await?;
            }
            None => warn!("no pending deposit transaction to confirm"),
        }

        // A confirmed deposit is credited against the final milestone.
        if milestone == Milestone::Deposit && order.pricing().is_some() {
            let (order, _) = reprice(&self.ctx, order, None, Some(actor.id)).await?;
            return Ok(order);
        }
        Ok(order)
    }

    #[instrument(skip(self, note), fields(bulk_purchase_order_id = %id, %milestone), err)]
    pub async fn mark_as_unpaid(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        milestone: Milestone,
        note: Option<String>,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        let now = Utc::now();
        let order = dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::MarkAsUnpaid {
                milestone,
                admin_id: actor.id,
                note: note.clone(),
                occurred_at: now,
            },
        )
        .await?;

        match self
            .ctx
            .transactions
            .find_pending(&order_ref(&order)?, milestone, PaymentType::BankTransfer)
            .await?
        {
            Some(mut transaction) => {
                let loaded = transaction.version;
                transaction.mark_unpaid(now, note)?;
                self.ctx.transactions.save(&transaction, loaded).await?;
            }
            None => warn!("no pending transfer to reject"),
        }
        Ok(order)
    }

    pub async fn request_second_payment(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::RequestSecondPayment {
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Adds or replaces one raw material, PPS or production item.
    pub async fn upsert_checklist(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        kind: ChecklistKind,
        input: ChecklistInput,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        let order = self.load_visible(actor, id).await?;
        require_admin_or_seller(actor, &order)?;
        let item = ChecklistItem {
            id: input.id.unwrap_or_else(ChecklistItemId::new),
            name: input.name,
            description: input.description,
            status: input.status,
            attachments: input.attachments,
            updated_at: None,
        };
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::UpsertChecklistItem {
                kind,
                item,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn buyer_approve_raw_material(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        item_ids: Vec<ChecklistItemId>,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        if !actor.is_buyer() {
            return Err(LifecycleError::Unauthorized);
        }
        let order = self.load_visible(actor, id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::BuyerApproveRawMaterial {
                buyer_id: actor.id,
                item_ids,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn create_qc_report(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        input: QcInput,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        let order = self.load_visible(actor, id).await?;
        require_admin_or_seller(actor, &order)?;
        let now = Utc::now();
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::CreateQcReport {
                report: QcReport {
                    id: ChecklistItemId::new(),
                    status: input.status,
                    note: input.note,
                    attachments: input.attachments,
                    created_at: now,
                },
                occurred_at: now,
            },
        )
        .await
    }

    pub async fn submit_goods(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        let order = self.load_visible(actor, id).await?;
        require_admin_or_seller(actor, &order)?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::SubmitGoods {
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Fixes the final terms and reprices the final milestone.
    #[instrument(skip(self, terms), fields(bulk_purchase_order_id = %id), err)]
    pub async fn mark_final_payment(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        terms: FinalPaymentTerms,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.preview_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        let order = dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::MarkFinalPayment {
                admin_id: actor.id,
                terms,
                occurred_at: Utc::now(),
            },
        )
        .await?;
        let (order, _) = reprice(&self.ctx, order, None, Some(actor.id)).await?;
        Ok(order)
    }

    pub async fn mark_delivering(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        logistic_info: Value,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::MarkDelivering {
                logistic_info,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn mark_delivered(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::MarkDelivered {
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Buyer receipt. Admins may confirm on the buyer's behalf.
    pub async fn confirm_delivered(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        let order = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, order.buyer_id())?;
        let buyer_id = order.buyer_id().ok_or(LifecycleError::NotFound)?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::ConfirmDelivered {
                buyer_id,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Records a deposit. Only a paid deposit is credited against the final
    /// payment; an unpaid one waits for `mark_as_paid(Deposit)`.
    #[instrument(skip(self, input), fields(bulk_purchase_order_id = %id, amount = %input.amount), err)]
    pub async fn create_deposit(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        input: DepositInput,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        let now = Utc::now();
        let order = dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::RecordDeposit {
                amount: input.amount,
                is_paid: input.is_paid,
                occurred_at: now,
            },
        )
        .await?;

        let status = if input.is_paid {
            TransactionStatus::Paid
        } else {
            TransactionStatus::WaitingConfirm
        };
        let transaction = PaymentTransaction::record(NewTransaction {
            reference_id: reference::transaction(),
            order: order_ref(&order)?,
            payer_id: order.buyer_id().unwrap_or(actor.id),
            amount: input.amount,
            currency: order.currency(),
            milestone: Milestone::Deposit,
            payment_percentage: 0,
            payment_type: PaymentType::BankTransfer,
            status,
            transaction_ref_id: input.transaction_ref_id,
            attachments: input.attachments,
            payment_intent_id: None,
            note: input.note,
            created_at: now,
        });
        self.ctx.transactions.insert(&transaction).await?;

        if !input.is_paid || order.pricing().is_none() {
            return Ok(order);
        }
        let (order, _) = reprice(&self.ctx, order, None, Some(actor.id)).await?;
        Ok(order)
    }

    /// Manual forward move of the buyer tracking.
    pub async fn advance_tracking(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        target: BulkTrackingStatus,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::AdvanceTracking {
                target,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Back to `New`. Refused once any first payment has been received.
    #[instrument(skip(self), fields(bulk_purchase_order_id = %id), err)]
    pub async fn reset(&self, actor: &Actor, id: BulkPurchaseOrderId) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        let now = Utc::now();
        let order = dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::Reset { occurred_at: now },
        )
        .await?;

        // Transfers waiting on milestones that no longer exist are rejected.
        let pending = self
            .ctx
            .transactions
            .list_for_order(&order_ref(&order)?)
            .await?
            .into_iter()
            .filter(PaymentTransaction::is_pending);
        for mut transaction in pending {
            let loaded = transaction.version;
            transaction.mark_unpaid(now, Some("order reset".into()))?;
            self.ctx.transactions.save(&transaction, loaded).await?;
            info!(
                reference_id = %transaction.reference_id,
                milestone = %transaction.milestone,
                "pending transfer rejected on reset"
            );
        }
        Ok(order)
    }

    pub async fn assign_seller(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        seller: SellerRef,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::AssignSeller {
                seller,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Sellers may quote on any order they can reach by id.
    pub async fn submit_seller_quotation(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        price: Decimal,
        lead_time_days: u32,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        if !actor.is_seller() {
            return Err(LifecycleError::Unauthorized);
        }
        let order = self.ctx.bulk_orders.load(&id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::SubmitSellerQuotation {
                seller_id: actor.id,
                price,
                lead_time_days,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn respond_to_po(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        accept: bool,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        if !actor.is_seller() {
            return Err(LifecycleError::Unauthorized);
        }
        let order = self.load_visible(actor, id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::RespondToPo {
                seller_id: actor.id,
                accept,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn advance_seller_tracking(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        target: SellerTrackingStatus,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        let order = self.load_visible(actor, id).await?;
        require_admin_or_seller(actor, &order)?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::AdvanceSellerTracking {
                target,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn assign_pic(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        assignee_ids: Vec<UserId>,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        require_admin(actor)?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::AssignPic {
                assignee_ids,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Hosted card payment link for one milestone.
    #[instrument(skip(self), fields(bulk_purchase_order_id = %id, %milestone), err)]
    pub async fn create_payment_link(
        &self,
        actor: &Actor,
        id: BulkPurchaseOrderId,
        milestone: Milestone,
    ) -> LifecycleResult<PaymentLink> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(bulk_purchase_order_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.bulk_orders.load(&id).await?;
        order.ensure_payable(milestone)?;
        let (order, pricing) =
            reprice(&self.ctx, order, Some((milestone, PaymentType::Card)), Some(actor.id)).await?;
        let amounts = pricing
            .milestone(milestone)
            .ok_or_else(|| LifecycleError::invalid_state(format!("{milestone} has no amounts")))?;

        let request = LinkRequest {
            currency: pricing.currency,
            line_items: link_lines(
                pricing.currency,
                &[
                    ("Subtotal", amounts.sub_total - amounts.deduction),
                    ("Shipping fee", amounts.shipping_fee),
                    ("Tax", amounts.tax),
                    ("Transaction fee", amounts.transaction_fee),
                ],
            )?,
            metadata: metadata([
                ("bulk_purchase_order_id", id.to_string()),
                ("reference_id", order.reference_id().to_string()),
                ("milestone", milestone.to_string()),
            ]),
            redirect_url: format!(
                "{}/api/v1/bulk-purchase-orders/{id}",
                self.ctx.config.server_base_url
            ),
        };
        let link = self.ctx.gateway.create_payment_link(request).await?;
        dispatch(
            &self.ctx,
            Some(actor.id),
            order,
            BulkPurchaseOrderCommand::AttachPaymentLink {
                milestone,
                link: link.clone(),
                occurred_at: Utc::now(),
            },
        )
        .await?;
        Ok(link)
    }

    /// Creates one bulk order per row. A failing row does not stop the others.
    #[instrument(skip(self, rows), fields(rows = rows.len()), err)]
    pub async fn import(&self, actor: &Actor, rows: Vec<ImportRow>) -> LifecycleResult<Vec<ImportOutcome>> {
        require_admin(actor)?;
        let pool = BoundedPool::new(self.ctx.config.import_concurrency);
        let sample_ids: Vec<PurchaseOrderId> = rows.iter().map(|row| row.purchase_order_id).collect();
        let ctx = Arc::clone(&self.ctx);
        let admin_id = actor.id;

        let results = pool
            .run(rows.into_iter().enumerate().collect(), move |(index, row): (usize, ImportRow)| {
                let ctx = Arc::clone(&ctx);
                async move {
                    let purchase_order_id = row.purchase_order_id;
                    let result = import_row(&ctx, admin_id, row).await;
                    if let Err(err) = &result {
                        warn!(row = index, %purchase_order_id, error = %err, "import row failed");
                    }
                    ImportOutcome {
                        row: index,
                        purchase_order_id,
                        bulk_purchase_order_id: result.as_ref().ok().map(BulkPurchaseOrder::id_typed),
                        error: result.err().map(|err| err.to_string()),
                    }
                }
            })
            .await;

        let outcomes: Vec<ImportOutcome> = results
            .into_iter()
            .zip(sample_ids)
            .enumerate()
            .map(|(index, (result, purchase_order_id))| {
                result.unwrap_or_else(|err| ImportOutcome {
                    row: index,
                    purchase_order_id,
                    bulk_purchase_order_id: None,
                    error: Some(err.to_string()),
                })
            })
            .collect();
        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        info!(imported = outcomes.len() - failed, failed, "bulk import finished");
        Ok(outcomes)
    }

    /// Reprices several orders concurrently, each under its own lock.
    pub async fn preview_many(
        &self,
        actor: &Actor,
        ids: Vec<BulkPurchaseOrderId>,
    ) -> LifecycleResult<Vec<PreviewOutcome>> {
        require_admin(actor)?;
        let pool = BoundedPool::new(self.ctx.config.import_concurrency);
        let ctx = Arc::clone(&self.ctx);
        let admin_id = actor.id;
        let results = pool
            .run(ids.clone(), move |id: BulkPurchaseOrderId| {
                let ctx = Arc::clone(&ctx);
                async move {
                    let result = preview_one(&ctx, admin_id, id).await;
                    PreviewOutcome {
                        bulk_purchase_order_id: id,
                        error: result.as_ref().err().map(ToString::to_string),
                        pricing: result.ok(),
                    }
                }
            })
            .await;

        Ok(results
            .into_iter()
            .zip(ids)
            .map(|(result, id)| {
                result.unwrap_or_else(|err| PreviewOutcome {
                    bulk_purchase_order_id: id,
                    pricing: None,
                    error: Some(err.to_string()),
                })
            })
            .collect())
    }

    async fn load_visible(&self, actor: &Actor, id: BulkPurchaseOrderId) -> LifecycleResult<BulkPurchaseOrder> {
        let order = self.ctx.bulk_orders.load(&id).await?;
        if order.is_visible_to(actor) {
            Ok(order)
        } else {
            Err(LifecycleError::NotFound)
        }
    }

    async fn settle_intent(
        &self,
        order: BulkPurchaseOrder,
        milestone: Milestone,
        intent: PaymentIntent,
        payer_id: UserId,
    ) -> LifecycleResult<CheckoutOutcome> {
        match intent.status {
            IntentStatus::Succeeded => {
                let transaction = self
                    .complete_card_payment(order, milestone, &intent.id, payer_id)
                    .await?;
                Ok(CheckoutOutcome::Paid { transaction })
            }
            IntentStatus::RequiresAction => {
                dispatch(
                    &self.ctx,
                    Some(payer_id),
                    order,
                    BulkPurchaseOrderCommand::RecordPaymentAction {
                        milestone,
                        payment_intent_id: intent.id.clone(),
                        next_action: intent.next_action.clone(),
                        occurred_at: Utc::now(),
                    },
                )
                .await?;
                info!(payment_intent_id = %intent.id, "card payment requires buyer action");
                Ok(CheckoutOutcome::RequiresAction {
                    payment_intent_id: intent.id,
                    next_action: intent.next_action,
                })
            }
            status => {
                warn!(payment_intent_id = %intent.id, status = status.as_str(), "card payment failed");
                Err(GatewayError::UnexpectedStatus(status.as_str().to_string()).into())
            }
        }
    }

    async fn complete_card_payment(
        &self,
        order: BulkPurchaseOrder,
        milestone: Milestone,
        payment_intent_id: &str,
        payer_id: UserId,
    ) -> LifecycleResult<PaymentTransaction> {
        let now = Utc::now();
        let order = dispatch(
            &self.ctx,
            Some(payer_id),
            order,
            BulkPurchaseOrderCommand::ConfirmCardPayment {
                milestone,
                payment_intent_id: payment_intent_id.to_string(),
                occurred_at: now,
            },
        )
        .await?;
        let transaction = PaymentTransaction::record(NewTransaction {
            reference_id: reference::transaction(),
            order: order_ref(&order)?,
            payer_id,
            amount: order.amount_due(milestone),
            currency: order.currency(),
            milestone,
            payment_percentage: order.plan().percentage(milestone),
            payment_type: PaymentType::Card,
            status: payment_route(milestone, PaymentType::Card).checkout_status,
            transaction_ref_id: None,
            attachments: vec![],
            payment_intent_id: Some(payment_intent_id.to_string()),
            note: None,
            created_at: now,
        });
        self.ctx.transactions.insert(&transaction).await?;
        info!(reference_id = %transaction.reference_id, %milestone, "card payment settled");
        Ok(transaction)
    }
}

/// Creates the bulk order of a paid sample.
pub(crate) async fn derive_from_sample(
    ctx: &EngineContext,
    actor_id: UserId,
    sample: &PurchaseOrder,
    items: Option<Vec<CartItem>>,
) -> LifecycleResult<BulkPurchaseOrder> {
    if !sample.is_paid() {
        return Err(LifecycleError::invalid_state("the sample order is not paid yet"));
    }
    let sample_id = sample.id_typed();
    if ctx
        .bulk_orders
        .store()
        .find_by_key("purchase_order_id", &sample_id.to_string())
        .await?
        .is_some()
    {
        return Err(LifecycleError::PersistenceConflict(format!(
            "{} already has a bulk order",
            sample.reference_id()
        )));
    }
    let inquiry_id = sample.inquiry_id().ok_or(LifecycleError::NotFound)?;
    let buyer_id = sample.buyer_id().ok_or(LifecycleError::NotFound)?;
    let inquiry = ctx.inquiries.load(&inquiry_id).await?;

    let items = items.unwrap_or_else(|| {
        sample
            .items()
            .iter()
            .map(|line| {
                let mut item = CartItem::new(line.size.clone(), line.color.clone(), line.qty, Decimal::ZERO);
                item.note = line.note.clone();
                item
            })
            .collect()
    });

    let id = BulkPurchaseOrderId::new();
    let outcome = ctx
        .bulk_orders
        .execute(
            &id,
            &BulkPurchaseOrderCommand::Create(CreateBulkPurchaseOrder {
                order_id: id,
                reference_id: reference::bulk_purchase_order(),
                purchase_order_id: sample_id,
                inquiry_id,
                buyer_id,
                currency: sample.currency(),
                items,
                quotations: inquiry.quotations().to_vec(),
                tax_percentage: inquiry.tax_percentage(),
                shipping_fee: inquiry.shipping_fee(),
                sample_total: sample.pricing().map_or(Decimal::ZERO, |p| p.sub_total),
                occurred_at: Utc::now(),
            }),
            || BulkPurchaseOrder::empty(id),
        )
        .await?;
    ctx.record(
        AuditSubject::BulkPurchaseOrder(id),
        Some(inquiry_id),
        Some(actor_id),
        &outcome.events,
    )
    .await;
    info!(bulk_purchase_order_id = %id, purchase_order_id = %sample_id, "bulk order created");
    Ok(outcome.aggregate)
}

async fn import_row(ctx: &EngineContext, admin_id: UserId, row: ImportRow) -> LifecycleResult<BulkPurchaseOrder> {
    let sample = ctx.purchase_orders.load(&row.purchase_order_id).await?;
    let items = (!row.items.is_empty()).then(|| into_items(row.items));
    derive_from_sample(ctx, admin_id, &sample, items).await
}

async fn preview_one(
    ctx: &EngineContext,
    admin_id: UserId,
    id: BulkPurchaseOrderId,
) -> LifecycleResult<BulkPricing> {
    let _guard = ctx
        .acquire(bulk_purchase_order_key(id), ctx.config.preview_lock_timeout)
        .await?;
    let order = ctx.bulk_orders.load(&id).await?;
    let (_, pricing) = reprice(ctx, order, None, Some(admin_id)).await?;
    Ok(pricing)
}

/// Recomputes and stores pricing. Must run under the order lock.
///
/// `payment` switches the payment type of one unsettled milestone before
/// pricing. Once the final milestone is settled the stored pricing is final.
async fn reprice(
    ctx: &EngineContext,
    order: BulkPurchaseOrder,
    payment: Option<(Milestone, PaymentType)>,
    actor_id: Option<UserId>,
) -> LifecycleResult<(BulkPurchaseOrder, BulkPricing)> {
    if order.is_settled(Milestone::Final) {
        if let Some(pricing) = order.pricing().cloned() {
            return Ok((order, pricing));
        }
    }
    let mut payment_types = order.payment_types();
    if let Some((milestone, payment_type)) = payment {
        if milestone != Milestone::Deposit && !order.is_settled(milestone) {
            payment_types.set(milestone, payment_type);
        }
    }
    let pricing = order.price_with(&ctx.pricing, payment_types)?;
    let order = dispatch(
        ctx,
        actor_id,
        order,
        BulkPurchaseOrderCommand::ApplyPricing {
            pricing: pricing.clone(),
            occurred_at: Utc::now(),
        },
    )
    .await?;
    Ok((order, pricing))
}

async fn dispatch(
    ctx: &EngineContext,
    actor_id: Option<UserId>,
    order: BulkPurchaseOrder,
    command: BulkPurchaseOrderCommand,
) -> LifecycleResult<BulkPurchaseOrder> {
    let id = order.id_typed();
    let inquiry_id = order.inquiry_id();
    let outcome = ctx.bulk_orders.execute_on(order, &command).await?;
    ctx.record(AuditSubject::BulkPurchaseOrder(id), inquiry_id, actor_id, &outcome.events)
        .await;
    Ok(outcome.aggregate)
}

fn order_ref(order: &BulkPurchaseOrder) -> LifecycleResult<OrderRef> {
    match (order.inquiry_id(), order.purchase_order_id()) {
        (Some(inquiry_id), Some(purchase_order_id)) => {
            Ok(OrderRef::bulk(inquiry_id, purchase_order_id, order.id_typed()))
        }
        _ => Err(LifecycleError::NotFound),
    }
}

/// Admins, or the seller the order is assigned to.
fn require_admin_or_seller(actor: &Actor, order: &BulkPurchaseOrder) -> LifecycleResult<()> {
    let assigned = order.seller().and_then(SellerRef::seller_id);
    if actor.is_admin() || (actor.is_seller() && assigned == Some(actor.id)) {
        Ok(())
    } else {
        Err(LifecycleError::Unauthorized)
    }
}
