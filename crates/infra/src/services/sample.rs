//! Sample purchase order checkout and settlement.
//!
//! Preview, checkout and settlement of one order run under
//! `purchase_order_payment_{id}`, so a price can never move between the
//! preview a buyer saw and the transaction that pays it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use inflow_bulk::BulkPurchaseOrder;
use inflow_core::{Actor, Attachment, InquiryId, PurchaseOrderId, UserId};
use inflow_inquiry::Inquiry;
use inflow_payments::{
    GatewayError, IntentRequest, IntentStatus, LinkRequest, NewTransaction, OrderRef,
    PaymentIntent, PaymentLink, PaymentTransaction, TransactionStatus,
};
use inflow_pricing::{Milestone, PaymentType, PricingSnapshot, QuotationKind, SamplePricingInput};
use inflow_purchasing::{LeadTime, PoTrackingTrigger, PurchaseOrder, PurchaseOrderCommand};

use crate::audit::AuditSubject;
use crate::error::{LifecycleError, LifecycleResult};
use crate::lock::purchase_order_payment_key;

use super::{
    CallbackOutcome, CheckoutOutcome, EngineContext, LineInput, bulk, into_items, link_lines,
    metadata, reference, require_admin, require_owner_or_admin,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SampleCheckout {
    #[serde(default)]
    pub payment_type: PaymentType,
    /// Bank reference of the transfer. Either this or an attachment is required.
    #[serde(default)]
    pub transaction_ref_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SampleOrderService {
    ctx: Arc<EngineContext>,
}

impl SampleOrderService {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, actor: &Actor, id: PurchaseOrderId) -> LifecycleResult<PurchaseOrder> {
        self.load_visible(actor, id).await
    }

    pub async fn find_for_inquiry(
        &self,
        actor: &Actor,
        inquiry_id: InquiryId,
    ) -> LifecycleResult<PurchaseOrder> {
        let order = self
            .ctx
            .purchase_orders
            .store()
            .find_by_key("inquiry_id", &inquiry_id.to_string())
            .await?
            .ok_or(LifecycleError::NotFound)?;
        ensure_visible(actor, &order)?;
        Ok(order)
    }

    /// Payment history of the order, oldest first.
    pub async fn transactions(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
    ) -> LifecycleResult<Vec<PaymentTransaction>> {
        let order = self.load_visible(actor, id).await?;
        let order_ref = order_ref(&order)?;
        Ok(self.ctx.transactions.list_for_order(&order_ref).await?)
    }

    /// Replaces every line of the cart. Pricing is dropped and recomputed
    /// when the inquiry already carries a sample quotation.
    #[instrument(skip(self, lines), fields(purchase_order_id = %id), err)]
    pub async fn replace_cart_items(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
        lines: Vec<LineInput>,
    ) -> LifecycleResult<PurchaseOrder> {
        let _guard = self
            .ctx
            .acquire(purchase_order_payment_key(id), self.ctx.config.preview_lock_timeout)
            .await?;
        let order = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, order.buyer_id())?;

        let order = self
            .execute(
                Some(actor.id),
                order,
                PurchaseOrderCommand::ReplaceCartItems {
                    items: into_items(lines),
                    occurred_at: Utc::now(),
                },
            )
            .await?;

        let inquiry = self.inquiry_of(&order).await?;
        if inquiry.quotation(QuotationKind::Sample).is_none() {
            return Ok(order);
        }
        let payment_type = order.payment_type();
        let (order, _) = self
            .preview_locked(order, &inquiry, payment_type, Some(actor.id))
            .await?;
        Ok(order)
    }

    /// Reprices the sample of `inquiry_id` with its current payment type.
    pub(crate) async fn reprice_for_inquiry(
        &self,
        actor: &Actor,
        inquiry_id: InquiryId,
    ) -> LifecycleResult<PricingSnapshot> {
        let id = self.find_for_inquiry(actor, inquiry_id).await?.id_typed();
        let _guard = self
            .ctx
            .acquire(purchase_order_payment_key(id), self.ctx.config.preview_lock_timeout)
            .await?;
        let order = self.ctx.purchase_orders.load(&id).await?;
        let inquiry = self.inquiry_of(&order).await?;
        let payment_type = order.payment_type();
        let (_, snapshot) = self
            .preview_locked(order, &inquiry, payment_type, Some(actor.id))
            .await?;
        Ok(snapshot)
    }

    /// Prices the order for `payment_type` and stores the snapshot.
    /// Calling it twice with the same inputs changes nothing the second time.
    #[instrument(skip(self), fields(purchase_order_id = %id), err)]
    pub async fn preview_checkout(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
        payment_type: PaymentType,
    ) -> LifecycleResult<PricingSnapshot> {
        let order = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, order.buyer_id())?;

        let _guard = self
            .ctx
            .acquire(purchase_order_payment_key(id), self.ctx.config.preview_lock_timeout)
            .await?;
        let order = self.ctx.purchase_orders.load(&id).await?;
        let inquiry = self.inquiry_of(&order).await?;
        let (_, snapshot) = self
            .preview_locked(order, &inquiry, payment_type, Some(actor.id))
            .await?;
        Ok(snapshot)
    }

    #[instrument(skip(self, input), fields(purchase_order_id = %id, payment_type = ?input.payment_type), err)]
    pub async fn checkout(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
        input: SampleCheckout,
    ) -> LifecycleResult<CheckoutOutcome> {
        let order = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, order.buyer_id())?;

        let _guard = self
            .ctx
            .acquire(purchase_order_payment_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.purchase_orders.load(&id).await?;
        order.status().ensure_checkout_allowed()?;
        let inquiry = self.inquiry_of(&order).await?;
        let (order, snapshot) = self
            .preview_locked(order, &inquiry, input.payment_type, Some(actor.id))
            .await?;

        match input.payment_type {
            PaymentType::BankTransfer => {
                let now = Utc::now();
                let order = self
                    .execute(
                        Some(actor.id),
                        order,
                        PurchaseOrderCommand::SubmitBankTransfer {
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
                    amount: snapshot.total,
                    currency: snapshot.currency,
                    milestone: Milestone::Final,
                    payment_percentage: 100,
                    payment_type: PaymentType::BankTransfer,
                    status: TransactionStatus::WaitingConfirm,
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
                let request = IntentRequest {
                    amount: snapshot.currency.to_smallest_unit(snapshot.total)?,
                    currency: snapshot.currency,
                    customer_ref: actor.id.to_string(),
                    payment_method_id: input.payment_method_id,
                    metadata: metadata([
                        ("purchase_order_id", id.to_string()),
                        ("reference_id", order.reference_id().to_string()),
                        ("milestone", Milestone::Final.to_string()),
                    ]),
                };
                let mut intent = self.ctx.gateway.create_payment_intent(request).await?;
                if intent.status == IntentStatus::RequiresConfirmation {
                    let return_url = self.ctx.config.purchase_order_return_url(id);
                    intent = self
                        .ctx
                        .gateway
                        .confirm_payment_intent(&intent.id, &return_url)
                        .await?;
                }
                self.settle_intent(order, &inquiry, intent, actor.id).await
            }
        }
    }

    /// Gateway return leg of a card payment that needed a buyer step.
    #[instrument(skip(self), fields(purchase_order_id = %id), err)]
    pub async fn confirm_payment_callback(
        &self,
        id: PurchaseOrderId,
    ) -> LifecycleResult<CallbackOutcome> {
        let _guard = self
            .ctx
            .acquire(purchase_order_payment_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.purchase_orders.load(&id).await?;
        if order.is_paid() {
            return Ok(CallbackOutcome::Paid { transaction: None });
        }
        let intent_id = order
            .payment_intent_id()
            .map(str::to_owned)
            .ok_or_else(|| LifecycleError::invalid_state("no card payment in progress"))?;

        let intent = self.ctx.gateway.retrieve_payment_intent(&intent_id).await?;
        match intent.status {
            IntentStatus::Succeeded => {
                let payer_id = order.buyer_id().ok_or(LifecycleError::NotFound)?;
                let inquiry = self.inquiry_of(&order).await?;
                let transaction = self
                    .complete_card_payment(order, &inquiry, &intent.id, payer_id)
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

    /// Admin confirmation that the money arrived.
    #[instrument(skip(self), fields(purchase_order_id = %id), err)]
    pub async fn mark_as_paid(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
        recorded_amount: Option<Decimal>,
    ) -> LifecycleResult<PurchaseOrder> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(purchase_order_payment_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.purchase_orders.load(&id).await?;
        let inquiry = self.inquiry_of(&order).await?;
        let now = Utc::now();
        let expected = order.total();

        let order = self
            .execute(
                Some(actor.id),
                order,
                PurchaseOrderCommand::MarkAsPaid {
                    admin_id: actor.id,
                    recorded_amount,
                    lead_time: sample_lead_time(&inquiry, now),
                    occurred_at: now,
                },
            )
            .await?;
        if let Some(recorded) = recorded_amount.filter(|amount| *amount != expected) {
            warn!(%expected, %recorded, "recorded amount differs from the priced total");
        }

        let order_ref = order_ref(&order)?;
        match self
            .ctx
            .transactions
            .find_pending(&order_ref, Milestone::Final, PaymentType::BankTransfer)
            .await?
        {
            Some(mut transaction) => {
                let loaded = transaction.version;
                transaction.mark_paid(now)?;
                self.ctx.transactions.save(&transaction, loaded).await?;
            }
            None => {
                let transaction = PaymentTransaction::record(NewTransaction {
                    reference_id: reference::transaction(),
                    order: order_ref,
                    payer_id: order.buyer_id().unwrap_or(actor.id),
                    amount: recorded_amount.unwrap_or(expected),
                    currency: order.currency(),
                    milestone: Milestone::Final,
                    payment_percentage: 100,
                    payment_type: order.payment_type(),
                    status: TransactionStatus::Paid,
                    transaction_ref_id: None,
                    attachments: vec![],
                    payment_intent_id: None,
                    note: Some("marked as paid by admin".into()),
                    created_at: now,
                });
                self.ctx.transactions.insert(&transaction).await?;
            }
        }

        self.ctx.finish_inquiry(inquiry.id_typed(), Some(actor.id)).await;
        Ok(order)
    }

    /// Admin rejection of a submitted transfer; the buyer may pay again.
    #[instrument(skip(self, note), fields(purchase_order_id = %id), err)]
    pub async fn mark_as_unpaid(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
        note: Option<String>,
    ) -> LifecycleResult<PurchaseOrder> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(purchase_order_payment_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.purchase_orders.load(&id).await?;
        let now = Utc::now();
        let order = self
            .execute(
                Some(actor.id),
                order,
                PurchaseOrderCommand::MarkAsUnpaid {
                    admin_id: actor.id,
                    note: note.clone(),
                    occurred_at: now,
                },
            )
            .await?;

        let order_ref = order_ref(&order)?;
        match self
            .ctx
            .transactions
            .find_pending(&order_ref, Milestone::Final, PaymentType::BankTransfer)
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

    /// Buyers may only confirm delivery; every other step is an admin's.
    pub async fn advance_tracking(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
        trigger: PoTrackingTrigger,
    ) -> LifecycleResult<PurchaseOrder> {
        let order = self.load_visible(actor, id).await?;
        if trigger == PoTrackingTrigger::ConfirmDelivered {
            require_owner_or_admin(actor, order.buyer_id())?;
        } else {
            require_admin(actor)?;
        }
        self.execute(
            Some(actor.id),
            order,
            PurchaseOrderCommand::AdvanceTracking {
                trigger,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn assign_pic(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
        assignee_ids: Vec<UserId>,
    ) -> LifecycleResult<PurchaseOrder> {
        require_admin(actor)?;
        let order = self.ctx.purchase_orders.load(&id).await?;
        self.execute(
            Some(actor.id),
            order,
            PurchaseOrderCommand::AssignPic {
                assignee_ids,
                occurred_at: Utc::now(),
            },
        )
        .await
    }

    /// Hosted card payment link for the full sample amount.
    #[instrument(skip(self), fields(purchase_order_id = %id), err)]
    pub async fn create_payment_link(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
    ) -> LifecycleResult<PaymentLink> {
        require_admin(actor)?;
        let _guard = self
            .ctx
            .acquire(purchase_order_payment_key(id), self.ctx.config.payment_lock_timeout)
            .await?;
        let order = self.ctx.purchase_orders.load(&id).await?;
        order.status().ensure_checkout_allowed()?;
        let inquiry = self.inquiry_of(&order).await?;
        let (order, snapshot) = self
            .preview_locked(order, &inquiry, PaymentType::Card, Some(actor.id))
            .await?;

        let request = LinkRequest {
            currency: snapshot.currency,
            line_items: link_lines(
                snapshot.currency,
                &[
                    ("Subtotal", snapshot.sub_total),
                    ("Shipping fee", snapshot.shipping_fee),
                    ("Tax", snapshot.tax),
                    ("Transaction fee", snapshot.transaction_fee),
                ],
            )?,
            metadata: metadata([
                ("purchase_order_id", id.to_string()),
                ("reference_id", order.reference_id().to_string()),
            ]),
            redirect_url: format!(
                "{}/api/v1/purchase-orders/{id}",
                self.ctx.config.server_base_url
            ),
        };
        let link = self.ctx.gateway.create_payment_link(request).await?;
        self.execute(
            Some(actor.id),
            order,
            PurchaseOrderCommand::AttachPaymentLink {
                link: link.clone(),
                occurred_at: Utc::now(),
            },
        )
        .await?;
        Ok(link)
    }

    /// Starts the bulk order of a paid sample. Lines keep size, colour and
    /// quantity; prices come from the bulk quotation later.
    pub async fn create_bulk_order(
        &self,
        actor: &Actor,
        id: PurchaseOrderId,
        lines: Option<Vec<LineInput>>,
    ) -> LifecycleResult<BulkPurchaseOrder> {
        let sample = self.load_visible(actor, id).await?;
        require_owner_or_admin(actor, sample.buyer_id())?;
        bulk::derive_from_sample(&self.ctx, actor.id, &sample, lines.map(into_items)).await
    }

    async fn load_visible(&self, actor: &Actor, id: PurchaseOrderId) -> LifecycleResult<PurchaseOrder> {
        let order = self.ctx.purchase_orders.load(&id).await?;
        ensure_visible(actor, &order)?;
        Ok(order)
    }

    async fn inquiry_of(&self, order: &PurchaseOrder) -> LifecycleResult<Inquiry> {
        let inquiry_id = order.inquiry_id().ok_or(LifecycleError::NotFound)?;
        self.ctx.inquiries.load(&inquiry_id).await
    }

    /// Must run under the order lock.
    async fn preview_locked(
        &self,
        order: PurchaseOrder,
        inquiry: &Inquiry,
        payment_type: PaymentType,
        actor_id: Option<UserId>,
    ) -> LifecycleResult<(PurchaseOrder, PricingSnapshot)> {
        if order.is_paid() {
            if let Some(snapshot) = order.pricing().cloned() {
                return Ok((order, snapshot));
            }
        }
        let snapshot = self.ctx.pricing.price_sample(&SamplePricingInput {
            currency: order.currency(),
            items: order.items(),
            quotations: inquiry.quotations(),
            tax_percentage: inquiry.tax_percentage(),
            shipping_fee: inquiry.shipping_fee(),
            payment_type,
        })?;
        let order = self
            .execute(
                actor_id,
                order,
                PurchaseOrderCommand::ApplyPricing {
                    snapshot: snapshot.clone(),
                    occurred_at: Utc::now(),
                },
            )
            .await?;
        Ok((order, snapshot))
    }

    async fn settle_intent(
        &self,
        order: PurchaseOrder,
        inquiry: &Inquiry,
        intent: PaymentIntent,
        payer_id: UserId,
    ) -> LifecycleResult<CheckoutOutcome> {
        match intent.status {
            IntentStatus::Succeeded => {
                let transaction = self
                    .complete_card_payment(order, inquiry, &intent.id, payer_id)
                    .await?;
                Ok(CheckoutOutcome::Paid { transaction })
            }
            IntentStatus::RequiresAction => {
                self.execute(
                    Some(payer_id),
                    order,
                    PurchaseOrderCommand::RecordPaymentAction {
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
        order: PurchaseOrder,
        inquiry: &Inquiry,
        payment_intent_id: &str,
        payer_id: UserId,
    ) -> LifecycleResult<PaymentTransaction> {
        let now = Utc::now();
        let order = self
            .execute(
                Some(payer_id),
                order,
                PurchaseOrderCommand::ConfirmCardPayment {
                    payment_intent_id: payment_intent_id.to_string(),
                    lead_time: sample_lead_time(inquiry, now),
                    occurred_at: now,
                },
            )
            .await?;
        let transaction = PaymentTransaction::record(NewTransaction {
            reference_id: reference::transaction(),
            order: order_ref(&order)?,
            payer_id,
            amount: order.total(),
            currency: order.currency(),
            milestone: Milestone::Final,
            payment_percentage: 100,
            payment_type: PaymentType::Card,
            status: TransactionStatus::Paid,
            transaction_ref_id: None,
            attachments: vec![],
            payment_intent_id: Some(payment_intent_id.to_string()),
            note: None,
            created_at: now,
        });
        self.ctx.transactions.insert(&transaction).await?;
        info!(reference_id = %transaction.reference_id, "card payment settled");

        self.ctx.finish_inquiry(inquiry.id_typed(), Some(payer_id)).await;
        Ok(transaction)
    }

    async fn execute(
        &self,
        actor_id: Option<UserId>,
        order: PurchaseOrder,
        command: PurchaseOrderCommand,
    ) -> LifecycleResult<PurchaseOrder> {
        let id = order.id_typed();
        let inquiry_id = order.inquiry_id();
        let outcome = self.ctx.purchase_orders.execute_on(order, &command).await?;
        self.ctx
            .record(AuditSubject::PurchaseOrder(id), inquiry_id, actor_id, &outcome.events)
            .await;
        Ok(outcome.aggregate)
    }
}

fn ensure_visible(actor: &Actor, order: &PurchaseOrder) -> LifecycleResult<()> {
    if actor.is_admin() || (actor.is_buyer() && order.buyer_id() == Some(actor.id)) {
        Ok(())
    } else {
        Err(LifecycleError::NotFound)
    }
}

fn order_ref(order: &PurchaseOrder) -> LifecycleResult<OrderRef> {
    let inquiry_id = order.inquiry_id().ok_or(LifecycleError::NotFound)?;
    Ok(OrderRef::sample(inquiry_id, order.id_typed()))
}

/// Production starts the day the sample is paid.
fn sample_lead_time(inquiry: &Inquiry, paid_at: DateTime<Utc>) -> Option<LeadTime> {
    inquiry
        .quotation(QuotationKind::Sample)
        .filter(|q| q.lead_time_days > 0)
        .map(|q| LeadTime::starting(q.lead_time_days, paid_at))
}
