use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use inflow_core::{
    Aggregate, AggregateRoot, Attachment, AuditAction, AuditEntry, Auditable, Currency,
    DomainError, Event, InquiryId, PurchaseOrderId, StateMachine, UserId,
};
use inflow_payments::PaymentLink;
use inflow_pricing::{CartItem, PaymentType, PricingSnapshot};

use crate::lead_time::LeadTime;
use crate::status::{PaymentStatus, PaymentTrigger, PoTrackingStatus, PoTrackingTrigger};

/// Aggregate root: PurchaseOrder (the sample order of one inquiry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    reference_id: String,
    inquiry_id: Option<InquiryId>,
    buyer_id: Option<UserId>,
    currency: Currency,
    status: PaymentStatus,
    tracking_status: PoTrackingStatus,
    items: Vec<CartItem>,
    pricing: Option<PricingSnapshot>,
    payment_type: PaymentType,
    transaction_ref_id: Option<String>,
    attachments: Vec<Attachment>,
    payment_intent_id: Option<String>,
    next_action: Option<Value>,
    payment_link: Option<PaymentLink>,
    transfered_at: Option<DateTime<Utc>>,
    mark_as_paid_at: Option<DateTime<Utc>>,
    mark_as_unpaid_at: Option<DateTime<Utc>>,
    lead_time: Option<LeadTime>,
    assignee_ids: Vec<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created instance for the create command.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            reference_id: String::new(),
            inquiry_id: None,
            buyer_id: None,
            currency: Currency::Usd,
            status: PaymentStatus::Pending,
            tracking_status: PoTrackingStatus::New,
            items: Vec::new(),
            pricing: None,
            payment_type: PaymentType::BankTransfer,
            transaction_ref_id: None,
            attachments: Vec::new(),
            payment_intent_id: None,
            next_action: None,
            payment_link: None,
            transfered_at: None,
            mark_as_paid_at: None,
            mark_as_unpaid_at: None,
            lead_time: None,
            assignee_ids: Vec::new(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    pub fn inquiry_id(&self) -> Option<InquiryId> {
        self.inquiry_id
    }

    pub fn buyer_id(&self) -> Option<UserId> {
        self.buyer_id
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn tracking_status(&self) -> PoTrackingStatus {
        self.tracking_status
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn pricing(&self) -> Option<&PricingSnapshot> {
        self.pricing.as_ref()
    }

    pub fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    pub fn transaction_ref_id(&self) -> Option<&str> {
        self.transaction_ref_id.as_deref()
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        self.payment_intent_id.as_deref()
    }

    pub fn next_action(&self) -> Option<&Value> {
        self.next_action.as_ref()
    }

    pub fn payment_link(&self) -> Option<&PaymentLink> {
        self.payment_link.as_ref()
    }

    pub fn transfered_at(&self) -> Option<DateTime<Utc>> {
        self.transfered_at
    }

    pub fn mark_as_paid_at(&self) -> Option<DateTime<Utc>> {
        self.mark_as_paid_at
    }

    pub fn mark_as_unpaid_at(&self) -> Option<DateTime<Utc>> {
        self.mark_as_unpaid_at
    }

    pub fn lead_time(&self) -> Option<&LeadTime> {
        self.lead_time.as_ref()
    }

    pub fn assignee_ids(&self) -> &[UserId] {
        &self.assignee_ids
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }

    /// Total of the current pricing snapshot, zero before the first preview.
    pub fn total(&self) -> Decimal {
        self.pricing.as_ref().map_or(Decimal::ZERO, |p| p.total)
    }

    fn priced(&self) -> Result<&PricingSnapshot, DomainError> {
        self.pricing
            .as_ref()
            .ok_or_else(|| DomainError::invalid_state("order has not been priced yet"))
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub reference_id: String,
    pub inquiry_id: InquiryId,
    pub buyer_id: UserId,
    pub currency: Currency,
    pub items: Vec<CartItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    Create(CreatePurchaseOrder),
    /// Delete-then-insert of every sample line.
    ReplaceCartItems {
        items: Vec<CartItem>,
        occurred_at: DateTime<Utc>,
    },
    /// Store a freshly computed snapshot. No-op when paid or unchanged.
    ApplyPricing {
        snapshot: PricingSnapshot,
        occurred_at: DateTime<Utc>,
    },
    SubmitBankTransfer {
        payer_id: UserId,
        transaction_ref_id: Option<String>,
        attachments: Vec<Attachment>,
        occurred_at: DateTime<Utc>,
    },
    /// The gateway asked for a further buyer step (3-D Secure).
    RecordPaymentAction {
        payment_intent_id: String,
        next_action: Option<Value>,
        occurred_at: DateTime<Utc>,
    },
    ConfirmCardPayment {
        payment_intent_id: String,
        lead_time: Option<LeadTime>,
        occurred_at: DateTime<Utc>,
    },
    MarkAsPaid {
        admin_id: UserId,
        /// Amount the admin saw arrive, if they entered one.
        recorded_amount: Option<Decimal>,
        lead_time: Option<LeadTime>,
        occurred_at: DateTime<Utc>,
    },
    MarkAsUnpaid {
        admin_id: UserId,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    AdvanceTracking {
        trigger: PoTrackingTrigger,
        occurred_at: DateTime<Utc>,
    },
    AssignPic {
        assignee_ids: Vec<UserId>,
        occurred_at: DateTime<Utc>,
    },
    AttachPaymentLink {
        link: PaymentLink,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    Created {
        order_id: PurchaseOrderId,
        reference_id: String,
        inquiry_id: InquiryId,
        buyer_id: UserId,
        currency: Currency,
        items: Vec<CartItem>,
        occurred_at: DateTime<Utc>,
    },
    CartItemsReplaced {
        before: Vec<CartItem>,
        after: Vec<CartItem>,
        occurred_at: DateTime<Utc>,
    },
    PricingApplied {
        before: Option<PricingSnapshot>,
        after: PricingSnapshot,
        occurred_at: DateTime<Utc>,
    },
    BankTransferSubmitted {
        payer_id: UserId,
        status_before: PaymentStatus,
        transaction_ref_id: Option<String>,
        attachments: Vec<Attachment>,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    },
    PaymentActionRequired {
        payment_intent_id: String,
        next_action: Option<Value>,
        occurred_at: DateTime<Utc>,
    },
    CardPaymentConfirmed {
        payment_intent_id: String,
        status_before: PaymentStatus,
        amount: Decimal,
        lead_time: Option<LeadTime>,
        occurred_at: DateTime<Utc>,
    },
    MarkedAsPaid {
        admin_id: UserId,
        status_before: PaymentStatus,
        expected_amount: Decimal,
        recorded_amount: Option<Decimal>,
        lead_time: Option<LeadTime>,
        occurred_at: DateTime<Utc>,
    },
    MarkedAsUnpaid {
        admin_id: UserId,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    TrackingAdvanced {
        before: PoTrackingStatus,
        after: PoTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    PicAssigned {
        before: Vec<UserId>,
        after: Vec<UserId>,
        occurred_at: DateTime<Utc>,
    },
    PaymentLinkAttached {
        link: PaymentLink,
        occurred_at: DateTime<Utc>,
    },
}

impl PurchaseOrderEvent {
    /// True when the event settled the order.
    pub fn settles(&self) -> bool {
        matches!(
            self,
            PurchaseOrderEvent::CardPaymentConfirmed { .. } | PurchaseOrderEvent::MarkedAsPaid { .. }
        )
    }
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::Created { .. } => "purchase_order.created",
            PurchaseOrderEvent::CartItemsReplaced { .. } => "purchase_order.cart_items_replaced",
            PurchaseOrderEvent::PricingApplied { .. } => "purchase_order.pricing_applied",
            PurchaseOrderEvent::BankTransferSubmitted { .. } => "purchase_order.bank_transfer_submitted",
            PurchaseOrderEvent::PaymentActionRequired { .. } => "purchase_order.payment_action_required",
            PurchaseOrderEvent::CardPaymentConfirmed { .. } => "purchase_order.card_payment_confirmed",
            PurchaseOrderEvent::MarkedAsPaid { .. } => "purchase_order.marked_as_paid",
            PurchaseOrderEvent::MarkedAsUnpaid { .. } => "purchase_order.marked_as_unpaid",
            PurchaseOrderEvent::TrackingAdvanced { .. } => "purchase_order.tracking_advanced",
            PurchaseOrderEvent::PicAssigned { .. } => "purchase_order.pic_assigned",
            PurchaseOrderEvent::PaymentLinkAttached { .. } => "purchase_order.payment_link_attached",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::Created { occurred_at, .. }
            | PurchaseOrderEvent::CartItemsReplaced { occurred_at, .. }
            | PurchaseOrderEvent::PricingApplied { occurred_at, .. }
            | PurchaseOrderEvent::BankTransferSubmitted { occurred_at, .. }
            | PurchaseOrderEvent::PaymentActionRequired { occurred_at, .. }
            | PurchaseOrderEvent::CardPaymentConfirmed { occurred_at, .. }
            | PurchaseOrderEvent::MarkedAsPaid { occurred_at, .. }
            | PurchaseOrderEvent::MarkedAsUnpaid { occurred_at, .. }
            | PurchaseOrderEvent::TrackingAdvanced { occurred_at, .. }
            | PurchaseOrderEvent::PicAssigned { occurred_at, .. }
            | PurchaseOrderEvent::PaymentLinkAttached { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Auditable for PurchaseOrderEvent {
    fn audit_entry(&self) -> Option<AuditEntry> {
        let entry = match self {
            PurchaseOrderEvent::Created { reference_id, items, .. } => AuditEntry::new(
                AuditAction::InquirySamplePoCreated,
                format!("Sample order {reference_id} created"),
            )
            .with("status", PaymentStatus::Pending)
            .with("tracking_status", PoTrackingStatus::New)
            .with("items", items),
            PurchaseOrderEvent::CartItemsReplaced { before, after, .. } => AuditEntry::new(
                AuditAction::InquirySamplePoCartItemsUpdated,
                "Sample items updated",
            )
            .change("items", before, after),
            PurchaseOrderEvent::PricingApplied { before, after, .. } => AuditEntry::new(
                AuditAction::InquirySamplePoPricingUpdated,
                "Sample pricing updated",
            )
            .change("total", before.as_ref().map(|p| p.total), after.total)
            .change("transaction_fee", before.as_ref().map(|p| p.transaction_fee), after.transaction_fee)
            .with("payment_type", after.payment_type),
            PurchaseOrderEvent::BankTransferSubmitted {
                status_before,
                transaction_ref_id,
                amount,
                ..
            } => AuditEntry::new(
                AuditAction::InquirySamplePoPaymentSubmitted,
                "Bank transfer submitted",
            )
            .change("status", status_before, PaymentStatus::WaitingConfirm)
            .with("transaction_ref_id", transaction_ref_id)
            .with("amount", amount),
            PurchaseOrderEvent::PaymentActionRequired { payment_intent_id, .. } => AuditEntry::new(
                AuditAction::InquirySamplePoPaymentRequiresAction,
                "Card payment requires action",
            )
            .with("payment_intent_id", payment_intent_id),
            PurchaseOrderEvent::CardPaymentConfirmed {
                payment_intent_id,
                status_before,
                amount,
                ..
            } => AuditEntry::new(AuditAction::InquirySamplePoCardPaid, "Card payment succeeded")
                .change("status", status_before, PaymentStatus::Paid)
                .with("payment_intent_id", payment_intent_id)
                .with("amount", amount),
            PurchaseOrderEvent::MarkedAsPaid {
                status_before,
                expected_amount,
                recorded_amount,
                ..
            } => {
                let entry = AuditEntry::new(AuditAction::InquiryAdminMarkAsPaid, "Admin marked sample as paid")
                    .change("status", status_before, PaymentStatus::Paid)
                    .with("amount", expected_amount);
                match recorded_amount {
                    Some(recorded) if recorded != expected_amount => entry
                        .with("recorded_amount", recorded)
                        .with("amount_mismatch", true),
                    _ => entry,
                }
            }
            PurchaseOrderEvent::MarkedAsUnpaid { note, .. } => AuditEntry::new(
                AuditAction::InquiryAdminMarkAsUnPaid,
                "Admin marked sample as unpaid",
            )
            .change("status", PaymentStatus::WaitingConfirm, PaymentStatus::Unpaid)
            .with("note", note),
            PurchaseOrderEvent::TrackingAdvanced { before, after, .. } => AuditEntry::new(
                AuditAction::InquirySamplePoTrackingStatus,
                "Sample tracking status updated",
            )
            .change("tracking_status", before, after),
            PurchaseOrderEvent::PicAssigned { before, after, .. } => {
                AuditEntry::new(AuditAction::InquirySamplePoAssignPic, "Sample assignees updated")
                    .change("assignee_ids", before, after)
            }
            PurchaseOrderEvent::PaymentLinkAttached { link, .. } => AuditEntry::new(
                AuditAction::InquirySamplePoPaymentLinkCreated,
                "Payment link created",
            )
            .with("payment_link", link),
        };
        Some(entry)
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::Created {
                order_id,
                reference_id,
                inquiry_id,
                buyer_id,
                currency,
                items,
                occurred_at,
            } => {
                self.id = *order_id;
                self.reference_id = reference_id.clone();
                self.inquiry_id = Some(*inquiry_id);
                self.buyer_id = Some(*buyer_id);
                self.currency = *currency;
                self.items = items.clone();
                self.status = PaymentStatus::Pending;
                self.tracking_status = PoTrackingStatus::New;
                self.created_at = Some(*occurred_at);
                self.created = true;
            }
            PurchaseOrderEvent::CartItemsReplaced { after, .. } => {
                self.items = after.clone();
                // Stored prices are a cache of the lines; drop them until the next preview.
                self.pricing = None;
            }
            PurchaseOrderEvent::PricingApplied { after, .. } => {
                self.items = after.items.clone();
                self.payment_type = after.payment_type;
                self.pricing = Some(after.clone());
            }
            PurchaseOrderEvent::BankTransferSubmitted {
                transaction_ref_id,
                attachments,
                occurred_at,
                ..
            } => {
                self.status = PaymentStatus::WaitingConfirm;
                self.payment_type = PaymentType::BankTransfer;
                self.transaction_ref_id = transaction_ref_id.clone();
                self.attachments = attachments.clone();
                self.transfered_at = Some(*occurred_at);
            }
            PurchaseOrderEvent::PaymentActionRequired {
                payment_intent_id,
                next_action,
                ..
            } => {
                self.payment_type = PaymentType::Card;
                self.payment_intent_id = Some(payment_intent_id.clone());
                self.next_action = next_action.clone();
            }
            PurchaseOrderEvent::CardPaymentConfirmed {
                payment_intent_id,
                lead_time,
                occurred_at,
                ..
            } => {
                self.status = PaymentStatus::Paid;
                self.payment_type = PaymentType::Card;
                self.payment_intent_id = Some(payment_intent_id.clone());
                self.next_action = None;
                self.mark_as_paid_at = Some(*occurred_at);
                if lead_time.is_some() {
                    self.lead_time = *lead_time;
                }
            }
            PurchaseOrderEvent::MarkedAsPaid {
                lead_time,
                occurred_at,
                ..
            } => {
                self.status = PaymentStatus::Paid;
                self.mark_as_paid_at = Some(*occurred_at);
                if lead_time.is_some() {
                    self.lead_time = *lead_time;
                }
            }
            PurchaseOrderEvent::MarkedAsUnpaid { occurred_at, .. } => {
                self.status = PaymentStatus::Unpaid;
                self.mark_as_unpaid_at = Some(*occurred_at);
            }
            PurchaseOrderEvent::TrackingAdvanced { after, .. } => {
                self.tracking_status = *after;
            }
            PurchaseOrderEvent::PicAssigned { after, .. } => {
                self.assignee_ids = after.clone();
            }
            PurchaseOrderEvent::PaymentLinkAttached { link, .. } => {
                self.payment_link = Some(link.clone());
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let creating = matches!(command, PurchaseOrderCommand::Create(_));
        if !creating && !self.created {
            return Err(DomainError::not_found());
        }

        match command {
            PurchaseOrderCommand::Create(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::ReplaceCartItems { items, occurred_at } => {
                self.handle_replace_items(items, *occurred_at)
            }
            PurchaseOrderCommand::ApplyPricing { snapshot, occurred_at } => {
                Ok(self.handle_apply_pricing(snapshot, *occurred_at))
            }
            PurchaseOrderCommand::SubmitBankTransfer {
                payer_id,
                transaction_ref_id,
                attachments,
                occurred_at,
            } => self.handle_submit_transfer(*payer_id, transaction_ref_id, attachments, *occurred_at),
            PurchaseOrderCommand::RecordPaymentAction {
                payment_intent_id,
                next_action,
                occurred_at,
            } => {
                self.status.ensure_checkout_allowed()?;
                Ok(vec![PurchaseOrderEvent::PaymentActionRequired {
                    payment_intent_id: payment_intent_id.clone(),
                    next_action: next_action.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            PurchaseOrderCommand::ConfirmCardPayment {
                payment_intent_id,
                lead_time,
                occurred_at,
            } => {
                self.status.transition(PaymentTrigger::Settle)?;
                Ok(vec![PurchaseOrderEvent::CardPaymentConfirmed {
                    payment_intent_id: payment_intent_id.clone(),
                    status_before: self.status,
                    amount: self.priced()?.total,
                    lead_time: *lead_time,
                    occurred_at: *occurred_at,
                }])
            }
            PurchaseOrderCommand::MarkAsPaid {
                admin_id,
                recorded_amount,
                lead_time,
                occurred_at,
            } => {
                self.status.transition(PaymentTrigger::Settle)?;
                Ok(vec![PurchaseOrderEvent::MarkedAsPaid {
                    admin_id: *admin_id,
                    status_before: self.status,
                    expected_amount: self.priced()?.total,
                    recorded_amount: *recorded_amount,
                    lead_time: *lead_time,
                    occurred_at: *occurred_at,
                }])
            }
            PurchaseOrderCommand::MarkAsUnpaid {
                admin_id,
                note,
                occurred_at,
            } => {
                self.status.transition(PaymentTrigger::Reject)?;
                Ok(vec![PurchaseOrderEvent::MarkedAsUnpaid {
                    admin_id: *admin_id,
                    note: note.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            PurchaseOrderCommand::AdvanceTracking { trigger, occurred_at } => {
                self.handle_tracking(*trigger, *occurred_at)
            }
            PurchaseOrderCommand::AssignPic {
                assignee_ids,
                occurred_at,
            } => {
                if assignee_ids == &self.assignee_ids {
                    return Ok(vec![]);
                }
                Ok(vec![PurchaseOrderEvent::PicAssigned {
                    before: self.assignee_ids.clone(),
                    after: assignee_ids.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            PurchaseOrderCommand::AttachPaymentLink { link, occurred_at } => {
                self.status.ensure_checkout_allowed()?;
                self.priced()?;
                Ok(vec![PurchaseOrderEvent::PaymentLinkAttached {
                    link: link.clone(),
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl PurchaseOrder {
    fn handle_create(&self, cmd: &CreatePurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        validate_items(&cmd.items)?;

        Ok(vec![PurchaseOrderEvent::Created {
            order_id: cmd.order_id,
            reference_id: cmd.reference_id.clone(),
            inquiry_id: cmd.inquiry_id,
            buyer_id: cmd.buyer_id,
            currency: cmd.currency,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_replace_items(
        &self,
        items: &[CartItem],
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.is_paid() {
            return Err(DomainError::already_paid("cannot change items of a paid order"));
        }
        if items.is_empty() {
            return Err(DomainError::validation("at least one item is required"));
        }
        validate_items(items)?;

        Ok(vec![PurchaseOrderEvent::CartItemsReplaced {
            before: self.items.clone(),
            after: items.to_vec(),
            occurred_at,
        }])
    }

    fn handle_apply_pricing(
        &self,
        snapshot: &PricingSnapshot,
        occurred_at: DateTime<Utc>,
    ) -> Vec<PurchaseOrderEvent> {
        // A settled order keeps its snapshot.
        if self.is_paid() && self.total() > Decimal::ZERO {
            return vec![];
        }
        if self.pricing.as_ref() == Some(snapshot) {
            return vec![];
        }
        vec![PurchaseOrderEvent::PricingApplied {
            before: self.pricing.clone(),
            after: snapshot.clone(),
            occurred_at,
        }]
    }

    fn handle_submit_transfer(
        &self,
        payer_id: UserId,
        transaction_ref_id: &Option<String>,
        attachments: &[Attachment],
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.status.ensure_checkout_allowed()?;
        self.status.transition(PaymentTrigger::SubmitTransfer)?;
        let amount = self.priced()?.total;

        if transaction_ref_id.as_deref().is_none_or(|r| r.trim().is_empty()) && attachments.is_empty() {
            return Err(DomainError::validation(
                "a transfer reference or a receipt attachment is required",
            ));
        }

        Ok(vec![PurchaseOrderEvent::BankTransferSubmitted {
            payer_id,
            status_before: self.status,
            transaction_ref_id: transaction_ref_id.clone(),
            attachments: attachments.to_vec(),
            amount,
            occurred_at,
        }])
    }

    fn handle_tracking(
        &self,
        trigger: PoTrackingTrigger,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let next = self.tracking_status.transition(trigger)?;
        if trigger == PoTrackingTrigger::ConfirmDelivered && !self.is_paid() {
            return Err(DomainError::invalid_state(
                "delivery can only be confirmed on a paid order",
            ));
        }
        Ok(vec![PurchaseOrderEvent::TrackingAdvanced {
            before: self.tracking_status,
            after: next,
            occurred_at,
        }])
    }
}

fn validate_items(items: &[CartItem]) -> Result<(), DomainError> {
    if let Some(line) = items.iter().position(|i| i.qty <= 0) {
        return Err(DomainError::validation(format!(
            "quantity must be positive (line {line})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflow_pricing::{PricingEngine, Quotation, QuotationKind, SamplePricingInput};
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn test_items() -> Vec<CartItem> {
        vec![
            CartItem::new("M", "black", 4, Decimal::ZERO),
            CartItem::new("L", "white", 5, Decimal::ZERO),
        ]
    }

    fn test_quotations() -> Vec<Quotation> {
        vec![Quotation {
            kind: QuotationKind::Sample,
            price: dec!(25),
            lead_time_days: 10,
            accepted: true,
        }]
    }

    fn execute(
        order: &mut PurchaseOrder,
        cmd: PurchaseOrderCommand,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let events = order.handle(&cmd)?;
        for e in &events {
            order.apply(e);
        }
        Ok(events)
    }

    fn created_order() -> PurchaseOrder {
        let id = PurchaseOrderId::new();
        let mut order = PurchaseOrder::empty(id);
        execute(
            &mut order,
            PurchaseOrderCommand::Create(CreatePurchaseOrder {
                order_id: id,
                reference_id: "PO-TEST01".into(),
                inquiry_id: InquiryId::new(),
                buyer_id: UserId::new(),
                currency: Currency::Usd,
                items: test_items(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        order
    }

    fn snapshot(order: &PurchaseOrder, payment_type: PaymentType) -> PricingSnapshot {
        PricingEngine::new()
            .price_sample(&SamplePricingInput {
                currency: order.currency(),
                items: order.items(),
                quotations: &test_quotations(),
                tax_percentage: dec!(10),
                shipping_fee: dec!(25),
                payment_type,
            })
            .unwrap()
    }

    fn priced_order() -> PurchaseOrder {
        let mut order = created_order();
        let snap = snapshot(&order, PaymentType::BankTransfer);
        execute(
            &mut order,
            PurchaseOrderCommand::ApplyPricing {
                snapshot: snap,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        order
    }

    fn mark_paid(order: &mut PurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        execute(
            order,
            PurchaseOrderCommand::MarkAsPaid {
                admin_id: UserId::new(),
                recorded_amount: None,
                lead_time: None,
                occurred_at: test_time(),
            },
        )
    }

    #[test]
    fn test_preview_twice_writes_once() {
        let mut order = priced_order();
        let version = order.version();
        assert_eq!(order.total(), dec!(275));

        let again = snapshot(&order, PaymentType::BankTransfer);
        let events = execute(
            &mut order,
            PurchaseOrderCommand::ApplyPricing {
                snapshot: again,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert!(events.is_empty());
        assert_eq!(order.version(), version);
    }

    #[test]
    fn test_paid_order_keeps_its_snapshot() {
        let mut order = priced_order();
        mark_paid(&mut order).unwrap();

        let card = snapshot(&order, PaymentType::Card);
        let events = execute(
            &mut order,
            PurchaseOrderCommand::ApplyPricing {
                snapshot: card,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert!(events.is_empty());
        assert_eq!(order.pricing().unwrap().payment_type, PaymentType::BankTransfer);
    }

    #[test]
    fn test_bank_transfer_moves_to_waiting_confirm() {
        let mut order = priced_order();
        let payer_id = order.buyer_id().unwrap();
        let events = execute(
            &mut order,
            PurchaseOrderCommand::SubmitBankTransfer {
                payer_id,
                transaction_ref_id: Some("TX1".into()),
                attachments: vec![],
                occurred_at: test_time(),
            },
        )
        .unwrap();

        match &events[0] {
            PurchaseOrderEvent::BankTransferSubmitted { amount, .. } => assert_eq!(*amount, dec!(275)),
            _ => panic!("Expected BankTransferSubmitted event"),
        }
        assert_eq!(order.status(), PaymentStatus::WaitingConfirm);
        assert_eq!(order.transfered_at(), Some(test_time()));

        // A second submission while waiting is refused.
        let payer_id = order.buyer_id().unwrap();
        let again = execute(
            &mut order,
            PurchaseOrderCommand::SubmitBankTransfer {
                payer_id,
                transaction_ref_id: Some("TX2".into()),
                attachments: vec![],
                occurred_at: test_time(),
            },
        );
        assert!(matches!(again, Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn test_checkout_requires_pricing() {
        let mut order = created_order();
        let result = execute(
            &mut order,
            PurchaseOrderCommand::SubmitBankTransfer {
                payer_id: UserId::new(),
                transaction_ref_id: Some("TX1".into()),
                attachments: vec![],
                occurred_at: test_time(),
            },
        );
        assert!(matches!(result, Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn test_requires_action_keeps_status() {
        let mut order = priced_order();
        execute(
            &mut order,
            PurchaseOrderCommand::RecordPaymentAction {
                payment_intent_id: "pi_1".into(),
                next_action: Some(serde_json::json!({"type": "redirect_to_url"})),
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert_eq!(order.status(), PaymentStatus::Pending);
        assert_eq!(order.payment_intent_id(), Some("pi_1"));
        assert!(order.next_action().is_some());

        let lead = LeadTime::starting(10, test_time());
        execute(
            &mut order,
            PurchaseOrderCommand::ConfirmCardPayment {
                payment_intent_id: "pi_1".into(),
                lead_time: Some(lead),
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert!(order.is_paid());
        assert!(order.next_action().is_none());
        assert_eq!(order.lead_time(), Some(&lead));
    }

    #[test]
    fn test_second_mark_paid_is_already_paid() {
        let mut order = priced_order();
        mark_paid(&mut order).unwrap();
        match mark_paid(&mut order) {
            Err(DomainError::AlreadyPaid(_)) => {}
            other => panic!("Expected AlreadyPaid, got {other:?}"),
        }
    }

    #[test]
    fn test_mark_paid_flags_amount_mismatch_in_audit() {
        let mut order = priced_order();
        let events = execute(
            &mut order,
            PurchaseOrderCommand::MarkAsPaid {
                admin_id: UserId::new(),
                recorded_amount: Some(dec!(200)),
                lead_time: None,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        let entry = events[0].audit_entry().unwrap();
        assert_eq!(entry.after["amount_mismatch"], true);
        assert!(order.is_paid());
    }

    #[test]
    fn test_mark_unpaid_only_from_waiting_confirm() {
        let mut order = priced_order();
        let unpaid = PurchaseOrderCommand::MarkAsUnpaid {
            admin_id: UserId::new(),
            note: Some("no transfer".into()),
            occurred_at: test_time(),
        };
        assert!(execute(&mut order, unpaid.clone()).is_err());

        execute(
            &mut order,
            PurchaseOrderCommand::SubmitBankTransfer {
                payer_id: UserId::new(),
                transaction_ref_id: None,
                attachments: vec![Attachment::new("receipts/1.png")],
                occurred_at: test_time(),
            },
        )
        .unwrap();
        execute(&mut order, unpaid).unwrap();
        assert_eq!(order.status(), PaymentStatus::Unpaid);
        assert!(order.status().ensure_checkout_allowed().is_ok());
    }

    #[test]
    fn test_confirm_delivered_requires_paid() {
        let mut order = priced_order();
        for trigger in [
            PoTrackingTrigger::ApproveDesign,
            PoTrackingTrigger::MarkMaking,
            PoTrackingTrigger::MarkDelivering,
        ] {
            execute(
                &mut order,
                PurchaseOrderCommand::AdvanceTracking {
                    trigger,
                    occurred_at: test_time(),
                },
            )
            .unwrap();
        }
        let confirm = PurchaseOrderCommand::AdvanceTracking {
            trigger: PoTrackingTrigger::ConfirmDelivered,
            occurred_at: test_time(),
        };
        assert!(matches!(
            execute(&mut order, confirm.clone()),
            Err(DomainError::InvalidState(_))
        ));

        mark_paid(&mut order).unwrap();
        execute(&mut order, confirm).unwrap();
        assert_eq!(order.tracking_status(), PoTrackingStatus::DeliveryConfirmed);
    }

    #[test]
    fn test_replace_items_rejected_once_paid() {
        let mut order = priced_order();
        execute(
            &mut order,
            PurchaseOrderCommand::ReplaceCartItems {
                items: vec![CartItem::new("S", "red", 2, Decimal::ZERO)],
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert!(order.pricing().is_none());
        let snap = snapshot(&order, PaymentType::BankTransfer);
        execute(
            &mut order,
            PurchaseOrderCommand::ApplyPricing {
                snapshot: snap,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        mark_paid(&mut order).unwrap();

        let result = execute(
            &mut order,
            PurchaseOrderCommand::ReplaceCartItems {
                items: test_items(),
                occurred_at: test_time(),
            },
        );
        assert!(matches!(result, Err(DomainError::AlreadyPaid(_))));
    }
}
