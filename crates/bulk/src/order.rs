use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use inflow_core::{
    Actor, Aggregate, AggregateRoot, Attachment, AuditAction, AuditEntry, Auditable,
    BulkPurchaseOrderId, ChecklistItemId, Currency, DomainError, DomainResult, Event, InquiryId,
    InvalidPricingInput, PurchaseOrderId, StateMachine, UserId,
};
use inflow_payments::PaymentLink;
use inflow_pricing::{
    AdditionalItem, BulkPricing, BulkPricingInput, CartItem, CommercialInvoice, Milestone,
    MilestonePaymentTypes, MilestonePlan, PaymentType, PricingEngine, Quotation, QuotationKind,
};
use inflow_purchasing::LeadTime;

use crate::checklist::{self, ChecklistItem, ChecklistKind, QcReport};
use crate::seller::{SellerRef, SellerTrackingStatus, SellerTrigger};
use crate::tracking::{BulkTrackingStatus, BulkTrackingTrigger};

/// Payment progress of one milestone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneState {
    pub payment_type: PaymentType,
    pub payment_intent_id: Option<String>,
    pub next_action: Option<Value>,
    pub transaction_ref_id: Option<String>,
    pub attachments: Vec<Attachment>,
    pub transfered_at: Option<DateTime<Utc>>,
    /// A bank transfer was submitted and nobody has ruled on it yet.
    pub awaiting_confirmation: bool,
    pub mark_as_paid_at: Option<DateTime<Utc>>,
    pub mark_as_unpaid_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
}

impl MilestoneState {
    pub fn is_settled(&self) -> bool {
        self.mark_as_paid_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerQuotation {
    pub seller_id: UserId,
    pub price: Decimal,
    pub lead_time_days: u32,
    pub submitted_at: DateTime<Utc>,
}

/// Aggregate root: BulkPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkPurchaseOrder {
    id: BulkPurchaseOrderId,
    reference_id: String,
    purchase_order_id: Option<PurchaseOrderId>,
    inquiry_id: Option<InquiryId>,
    buyer_id: Option<UserId>,
    currency: Currency,
    tracking_status: BulkTrackingStatus,
    seller: Option<SellerRef>,
    seller_tracking_status: Option<SellerTrackingStatus>,
    seller_quotations: Vec<SellerQuotation>,
    quotations: Vec<Quotation>,
    items: Vec<CartItem>,
    additional_items: Vec<AdditionalItem>,
    plan: MilestonePlan,
    payment_types: MilestonePaymentTypes,
    tax_percentage: Decimal,
    shipping_fee: Decimal,
    commercial_invoice: Option<CommercialInvoice>,
    deduct_sample: bool,
    sample_total: Decimal,
    deposit: Decimal,
    pending_deposit: Decimal,
    pricing: Option<BulkPricing>,
    milestones: BTreeMap<Milestone, MilestoneState>,
    raw_materials: Vec<ChecklistItem>,
    pps: Vec<ChecklistItem>,
    production: Vec<ChecklistItem>,
    qc_reports: Vec<QcReport>,
    logistic_info: Option<Value>,
    delivered_at: Option<DateTime<Utc>>,
    receiver_confirmed_at: Option<DateTime<Utc>>,
    lead_time: Option<LeadTime>,
    payment_links: BTreeMap<Milestone, PaymentLink>,
    assignee_ids: Vec<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl BulkPurchaseOrder {
    /// Create an empty, not-yet-created instance for the create command.
    pub fn empty(id: BulkPurchaseOrderId) -> Self {
        Self {
            id,
            reference_id: String::new(),
            purchase_order_id: None,
            inquiry_id: None,
            buyer_id: None,
            currency: Currency::Usd,
            tracking_status: BulkTrackingStatus::New,
            seller: None,
            seller_tracking_status: None,
            seller_quotations: Vec::new(),
            quotations: Vec::new(),
            items: Vec::new(),
            additional_items: Vec::new(),
            plan: MilestonePlan::default(),
            payment_types: MilestonePaymentTypes::default(),
            tax_percentage: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            commercial_invoice: None,
            deduct_sample: false,
            sample_total: Decimal::ZERO,
            deposit: Decimal::ZERO,
            pending_deposit: Decimal::ZERO,
            pricing: None,
            milestones: BTreeMap::new(),
            raw_materials: Vec::new(),
            pps: Vec::new(),
            production: Vec::new(),
            qc_reports: Vec::new(),
            logistic_info: None,
            delivered_at: None,
            receiver_confirmed_at: None,
            lead_time: None,
            payment_links: BTreeMap::new(),
            assignee_ids: Vec::new(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BulkPurchaseOrderId {
        self.id
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    pub fn purchase_order_id(&self) -> Option<PurchaseOrderId> {
        self.purchase_order_id
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

    pub fn tracking_status(&self) -> BulkTrackingStatus {
        self.tracking_status
    }

    pub fn seller(&self) -> Option<SellerRef> {
        self.seller
    }

    pub fn seller_tracking_status(&self) -> Option<SellerTrackingStatus> {
        self.seller_tracking_status
    }

    pub fn seller_quotations(&self) -> &[SellerQuotation] {
        &self.seller_quotations
    }

    pub fn quotations(&self) -> &[Quotation] {
        &self.quotations
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn additional_items(&self) -> &[AdditionalItem] {
        &self.additional_items
    }

    pub fn plan(&self) -> MilestonePlan {
        self.plan
    }

    pub fn payment_types(&self) -> MilestonePaymentTypes {
        self.payment_types
    }

    pub fn commercial_invoice(&self) -> Option<&CommercialInvoice> {
        self.commercial_invoice.as_ref()
    }

    pub fn deduct_sample(&self) -> bool {
        self.deduct_sample
    }

    /// Paid deposits credited against the final payment.
    pub fn deposit(&self) -> Decimal {
        self.deposit
    }

    /// Deposit recorded but not yet confirmed. Not credited.
    pub fn pending_deposit(&self) -> Decimal {
        self.pending_deposit
    }

    pub fn pricing(&self) -> Option<&BulkPricing> {
        self.pricing.as_ref()
    }

    pub fn milestone(&self, milestone: Milestone) -> Option<&MilestoneState> {
        self.milestones.get(&milestone)
    }

    pub fn is_settled(&self, milestone: Milestone) -> bool {
        self.milestone(milestone).is_some_and(MilestoneState::is_settled)
    }

    pub fn checklist(&self, kind: ChecklistKind) -> &[ChecklistItem] {
        match kind {
            ChecklistKind::RawMaterial => &self.raw_materials,
            ChecklistKind::Pps => &self.pps,
            ChecklistKind::Production => &self.production,
        }
    }

    pub fn qc_reports(&self) -> &[QcReport] {
        &self.qc_reports
    }

    pub fn logistic_info(&self) -> Option<&Value> {
        self.logistic_info.as_ref()
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn receiver_confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.receiver_confirmed_at
    }

    pub fn lead_time(&self) -> Option<&LeadTime> {
        self.lead_time.as_ref()
    }

    pub fn payment_link(&self, milestone: Milestone) -> Option<&PaymentLink> {
        self.payment_links.get(&milestone)
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

    /// Amount due for a milestone according to the stored pricing.
    pub fn amount_due(&self, milestone: Milestone) -> Decimal {
        self.pricing
            .as_ref()
            .map_or(Decimal::ZERO, |p| p.amount_due(milestone))
    }

    /// Admins see everything, buyers their own orders, sellers the orders
    /// they are assigned to or have quoted on.
    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        if actor.is_admin() {
            return true;
        }
        if actor.is_buyer() {
            return self.buyer_id == Some(actor.id);
        }
        self.seller.and_then(SellerRef::seller_id) == Some(actor.id)
            || self.seller_quotations.iter().any(|q| q.seller_id == actor.id)
    }

    /// Recomputes pricing from the authoritative lines, quotations and terms.
    pub fn price(&self, engine: &PricingEngine) -> DomainResult<BulkPricing> {
        self.price_with(engine, self.payment_types)
    }

    /// Same as [`price`](Self::price) with a different payment type per milestone.
    pub fn price_with(
        &self,
        engine: &PricingEngine,
        payment_types: MilestonePaymentTypes,
    ) -> DomainResult<BulkPricing> {
        engine.price_bulk(&BulkPricingInput {
            currency: self.currency,
            items: &self.items,
            quotations: &self.quotations,
            tax_percentage: self.tax_percentage,
            shipping_fee: self.shipping_fee,
            plan: self.plan,
            payment_types,
            commercial_invoice: self.commercial_invoice.as_ref(),
            additional_items: &self.additional_items,
            deposit: self.deposit,
            sample_deduction: if self.deduct_sample {
                self.sample_total
            } else {
                Decimal::ZERO
            },
        })
    }

    /// Checkout guard for one milestone.
    pub fn ensure_payable(&self, milestone: Milestone) -> DomainResult<()> {
        if milestone == Milestone::Deposit {
            return Err(DomainError::invalid_state("deposits are recorded by an admin"));
        }
        if self.is_settled(milestone) {
            return Err(DomainError::already_paid(format!("{milestone} is already paid")));
        }
        if self.milestone(milestone).is_some_and(|s| s.awaiting_confirmation) {
            return Err(DomainError::invalid_state(format!(
                "{milestone} is waiting for confirmation"
            )));
        }
        if milestone != Milestone::Final && self.plan.percentage(milestone) == 0 {
            return Err(DomainError::invalid_state(format!("no {milestone} is due")));
        }
        if !self
            .tracking_status
            .can(BulkTrackingTrigger::SubmitPayment(milestone))
        {
            return Err(DomainError::invalid_state(format!(
                "{milestone} is not payable at {:?}",
                self.tracking_status
            )));
        }
        Ok(())
    }

    /// Raw material, PPS, production, QC and the final payment request wait for
    /// the last planned upfront milestone.
    pub fn production_gate_open(&self) -> bool {
        if self.plan.has_second_payment() {
            self.is_settled(Milestone::Second)
        } else {
            self.is_settled(Milestone::First)
        }
    }

    fn ensure_priced(&self) -> DomainResult<&BulkPricing> {
        self.pricing
            .as_ref()
            .ok_or_else(|| DomainError::invalid_state("order has not been priced yet"))
    }

    fn ensure_production_gate(&self) -> DomainResult<()> {
        if self.production_gate_open() {
            Ok(())
        } else {
            Err(DomainError::invalid_state(
                "production requires the upfront payment to be confirmed",
            ))
        }
    }

    fn production_lead_time(&self, milestone: Milestone, at: DateTime<Utc>) -> Option<LeadTime> {
        if milestone != Milestone::First || self.lead_time.is_some() {
            return None;
        }
        Quotation::find(&self.quotations, QuotationKind::Bulk)
            .map(|q| LeadTime::starting(q.lead_time_days, at))
    }

    /// A deposit may not take more than the final milestone subtotal.
    fn ensure_deposit_fits(&self, amount: Decimal) -> DomainResult<()> {
        let Some(pricing) = self.pricing.as_ref() else {
            return Ok(());
        };
        let remaining = pricing.final_.sub_total;
        if amount > remaining {
            return Err(InvalidPricingInput::CreditsExceedFinal {
                credits: amount,
                remaining,
            }
            .into());
        }
        Ok(())
    }

    fn has_received_first_payment(&self) -> bool {
        self.milestone(Milestone::First).is_some_and(|s| {
            s.payment_intent_id.is_some() || s.mark_as_paid_at.is_some() || s.received_at.is_some()
        })
    }

    fn milestone_mut(&mut self, milestone: Milestone) -> &mut MilestoneState {
        self.milestones.entry(milestone).or_default()
    }

    fn checklist_mut(&mut self, kind: ChecklistKind) -> &mut Vec<ChecklistItem> {
        match kind {
            ChecklistKind::RawMaterial => &mut self.raw_materials,
            ChecklistKind::Pps => &mut self.pps,
            ChecklistKind::Production => &mut self.production,
        }
    }
}

impl AggregateRoot for BulkPurchaseOrder {
    type Id = BulkPurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateBulkPurchaseOrder (derived from a paid sample).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBulkPurchaseOrder {
    pub order_id: BulkPurchaseOrderId,
    pub reference_id: String,
    pub purchase_order_id: PurchaseOrderId,
    pub inquiry_id: InquiryId,
    pub buyer_id: UserId,
    pub currency: Currency,
    pub items: Vec<CartItem>,
    pub quotations: Vec<Quotation>,
    pub tax_percentage: Decimal,
    pub shipping_fee: Decimal,
    /// Sample order total, deducted from the final payment when requested.
    pub sample_total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendQuotation (admin prices the bulk order for the buyer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendQuotation {
    pub admin_id: UserId,
    pub quotations: Vec<Quotation>,
    pub plan: MilestonePlan,
    pub tax_percentage: Decimal,
    pub shipping_fee: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Terms fixed when QC is accepted and the final payment is requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalPaymentTerms {
    #[serde(default)]
    pub shipping_fee: Option<Decimal>,
    #[serde(default)]
    pub commercial_invoice: Option<CommercialInvoice>,
    #[serde(default)]
    pub additional_items: Vec<AdditionalItem>,
    #[serde(default)]
    pub deduct_sample: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BulkPurchaseOrderCommand {
    Create(CreateBulkPurchaseOrder),
    RequestSubmission {
        occurred_at: DateTime<Utc>,
    },
    SubmitOrder {
        items: Option<Vec<CartItem>>,
        occurred_at: DateTime<Utc>,
    },
    SendQuotation(SendQuotation),
    /// Store a freshly computed pricing. No-op when unchanged or fully settled.
    ApplyPricing {
        pricing: BulkPricing,
        occurred_at: DateTime<Utc>,
    },
    SubmitBankTransfer {
        milestone: Milestone,
        payer_id: UserId,
        transaction_ref_id: Option<String>,
        attachments: Vec<Attachment>,
        occurred_at: DateTime<Utc>,
    },
    RecordPaymentAction {
        milestone: Milestone,
        payment_intent_id: String,
        next_action: Option<Value>,
        occurred_at: DateTime<Utc>,
    },
    ConfirmCardPayment {
        milestone: Milestone,
        payment_intent_id: String,
        occurred_at: DateTime<Utc>,
    },
    MarkAsPaid {
        milestone: Milestone,
        admin_id: UserId,
        recorded_amount: Option<Decimal>,
        occurred_at: DateTime<Utc>,
    },
    MarkAsUnpaid {
        milestone: Milestone,
        admin_id: UserId,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    RequestSecondPayment {
        occurred_at: DateTime<Utc>,
    },
    UpsertChecklistItem {
        kind: ChecklistKind,
        item: ChecklistItem,
        occurred_at: DateTime<Utc>,
    },
    BuyerApproveRawMaterial {
        buyer_id: UserId,
        item_ids: Vec<ChecklistItemId>,
        occurred_at: DateTime<Utc>,
    },
    CreateQcReport {
        report: QcReport,
        occurred_at: DateTime<Utc>,
    },
    SubmitGoods {
        occurred_at: DateTime<Utc>,
    },
    MarkFinalPayment {
        admin_id: UserId,
        terms: FinalPaymentTerms,
        occurred_at: DateTime<Utc>,
    },
    MarkDelivering {
        logistic_info: Value,
        occurred_at: DateTime<Utc>,
    },
    MarkDelivered {
        occurred_at: DateTime<Utc>,
    },
    ConfirmDelivered {
        buyer_id: UserId,
        occurred_at: DateTime<Utc>,
    },
    RecordDeposit {
        amount: Decimal,
        is_paid: bool,
        occurred_at: DateTime<Utc>,
    },
    AdvanceTracking {
        target: BulkTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    Reset {
        occurred_at: DateTime<Utc>,
    },
    AssignSeller {
        seller: SellerRef,
        occurred_at: DateTime<Utc>,
    },
    SubmitSellerQuotation {
        seller_id: UserId,
        price: Decimal,
        lead_time_days: u32,
        occurred_at: DateTime<Utc>,
    },
    RespondToPo {
        seller_id: UserId,
        accept: bool,
        occurred_at: DateTime<Utc>,
    },
    AdvanceSellerTracking {
        target: SellerTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    AssignPic {
        assignee_ids: Vec<UserId>,
        occurred_at: DateTime<Utc>,
    },
    AttachPaymentLink {
        milestone: Milestone,
        link: PaymentLink,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BulkPurchaseOrderEvent {
    Created {
        order_id: BulkPurchaseOrderId,
        reference_id: String,
        purchase_order_id: PurchaseOrderId,
        inquiry_id: InquiryId,
        buyer_id: UserId,
        currency: Currency,
        items: Vec<CartItem>,
        quotations: Vec<Quotation>,
        tax_percentage: Decimal,
        shipping_fee: Decimal,
        sample_total: Decimal,
        occurred_at: DateTime<Utc>,
    },
    SubmissionRequested {
        occurred_at: DateTime<Utc>,
    },
    OrderSubmitted {
        tracking_before: BulkTrackingStatus,
        items: Vec<CartItem>,
        occurred_at: DateTime<Utc>,
    },
    QuotationSent {
        admin_id: UserId,
        quotations: Vec<Quotation>,
        plan: MilestonePlan,
        tax_percentage: Decimal,
        shipping_fee: Decimal,
        tracking_before: BulkTrackingStatus,
        tracking_after: BulkTrackingStatus,
        first_payment_skipped: bool,
        lead_time: Option<LeadTime>,
        occurred_at: DateTime<Utc>,
    },
    PricingApplied {
        before_total: Option<Decimal>,
        after: BulkPricing,
        occurred_at: DateTime<Utc>,
    },
    BankTransferSubmitted {
        milestone: Milestone,
        payer_id: UserId,
        tracking_before: BulkTrackingStatus,
        tracking_after: BulkTrackingStatus,
        transaction_ref_id: Option<String>,
        attachments: Vec<Attachment>,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    },
    PaymentActionRequired {
        milestone: Milestone,
        payment_intent_id: String,
        next_action: Option<Value>,
        occurred_at: DateTime<Utc>,
    },
    CardPaymentConfirmed {
        milestone: Milestone,
        payment_intent_id: String,
        tracking_before: BulkTrackingStatus,
        tracking_after: BulkTrackingStatus,
        amount: Decimal,
        lead_time: Option<LeadTime>,
        occurred_at: DateTime<Utc>,
    },
    MarkedAsPaid {
        milestone: Milestone,
        admin_id: UserId,
        tracking_before: BulkTrackingStatus,
        tracking_after: BulkTrackingStatus,
        expected_amount: Decimal,
        recorded_amount: Option<Decimal>,
        lead_time: Option<LeadTime>,
        occurred_at: DateTime<Utc>,
    },
    MarkedAsUnpaid {
        milestone: Milestone,
        admin_id: UserId,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    SecondPaymentRequested {
        tracking_before: BulkTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    ChecklistUpdated {
        kind: ChecklistKind,
        before: Vec<ChecklistItem>,
        after: Vec<ChecklistItem>,
        tracking_before: BulkTrackingStatus,
        tracking_after: BulkTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    RawMaterialApproved {
        buyer_id: UserId,
        before: Vec<ChecklistItem>,
        after: Vec<ChecklistItem>,
        occurred_at: DateTime<Utc>,
    },
    QcReportCreated {
        report: QcReport,
        tracking_before: BulkTrackingStatus,
        tracking_after: BulkTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    GoodsSubmitted {
        occurred_at: DateTime<Utc>,
    },
    FinalPaymentRequested {
        admin_id: UserId,
        terms: FinalPaymentTerms,
        tracking_before: BulkTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    DeliveryStarted {
        logistic_info: Value,
        tracking_before: BulkTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    Delivered {
        occurred_at: DateTime<Utc>,
    },
    DeliveryConfirmed {
        buyer_id: UserId,
        tracking_before: BulkTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    DepositRecorded {
        amount: Decimal,
        is_paid: bool,
        total_before: Decimal,
        occurred_at: DateTime<Utc>,
    },
    TrackingAdvanced {
        before: BulkTrackingStatus,
        after: BulkTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    Reset {
        tracking_before: BulkTrackingStatus,
        items_before: Vec<CartItem>,
        occurred_at: DateTime<Utc>,
    },
    SellerAssigned {
        before: Option<SellerRef>,
        after: SellerRef,
        occurred_at: DateTime<Utc>,
    },
    SellerQuotationSubmitted {
        quotation: SellerQuotation,
        occurred_at: DateTime<Utc>,
    },
    SellerResponded {
        seller_id: UserId,
        accepted: bool,
        after: SellerTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    SellerTrackingAdvanced {
        before: SellerTrackingStatus,
        after: SellerTrackingStatus,
        occurred_at: DateTime<Utc>,
    },
    PicAssigned {
        before: Vec<UserId>,
        after: Vec<UserId>,
        occurred_at: DateTime<Utc>,
    },
    PaymentLinkAttached {
        milestone: Milestone,
        link: PaymentLink,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for BulkPurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        use BulkPurchaseOrderEvent as E;
        match self {
            E::Created { .. } => "bulk_purchase_order.created",
            E::SubmissionRequested { .. } => "bulk_purchase_order.submission_requested",
            E::OrderSubmitted { .. } => "bulk_purchase_order.submitted",
            E::QuotationSent { .. } => "bulk_purchase_order.quotation_sent",
            E::PricingApplied { .. } => "bulk_purchase_order.pricing_applied",
            E::BankTransferSubmitted { .. } => "bulk_purchase_order.bank_transfer_submitted",
            E::PaymentActionRequired { .. } => "bulk_purchase_order.payment_action_required",
            E::CardPaymentConfirmed { .. } => "bulk_purchase_order.card_payment_confirmed",
            E::MarkedAsPaid { .. } => "bulk_purchase_order.marked_as_paid",
            E::MarkedAsUnpaid { .. } => "bulk_purchase_order.marked_as_unpaid",
            E::SecondPaymentRequested { .. } => "bulk_purchase_order.second_payment_requested",
            E::ChecklistUpdated { .. } => "bulk_purchase_order.checklist_updated",
            E::RawMaterialApproved { .. } => "bulk_purchase_order.raw_material_approved",
            E::QcReportCreated { .. } => "bulk_purchase_order.qc_report_created",
            E::GoodsSubmitted { .. } => "bulk_purchase_order.goods_submitted",
            E::FinalPaymentRequested { .. } => "bulk_purchase_order.final_payment_requested",
            E::DeliveryStarted { .. } => "bulk_purchase_order.delivery_started",
            E::Delivered { .. } => "bulk_purchase_order.delivered",
            E::DeliveryConfirmed { .. } => "bulk_purchase_order.delivery_confirmed",
            E::DepositRecorded { .. } => "bulk_purchase_order.deposit_recorded",
            E::TrackingAdvanced { .. } => "bulk_purchase_order.tracking_advanced",
            E::Reset { .. } => "bulk_purchase_order.reset",
            E::SellerAssigned { .. } => "bulk_purchase_order.seller_assigned",
            E::SellerQuotationSubmitted { .. } => "bulk_purchase_order.seller_quotation_submitted",
            E::SellerResponded { .. } => "bulk_purchase_order.seller_responded",
            E::SellerTrackingAdvanced { .. } => "bulk_purchase_order.seller_tracking_advanced",
            E::PicAssigned { .. } => "bulk_purchase_order.pic_assigned",
            E::PaymentLinkAttached { .. } => "bulk_purchase_order.payment_link_attached",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        use BulkPurchaseOrderEvent as E;
        match self {
            E::Created { occurred_at, .. }
            | E::SubmissionRequested { occurred_at }
            | E::OrderSubmitted { occurred_at, .. }
            | E::QuotationSent { occurred_at, .. }
            | E::PricingApplied { occurred_at, .. }
            | E::BankTransferSubmitted { occurred_at, .. }
            | E::PaymentActionRequired { occurred_at, .. }
            | E::CardPaymentConfirmed { occurred_at, .. }
            | E::MarkedAsPaid { occurred_at, .. }
            | E::MarkedAsUnpaid { occurred_at, .. }
            | E::SecondPaymentRequested { occurred_at, .. }
            | E::ChecklistUpdated { occurred_at, .. }
            | E::RawMaterialApproved { occurred_at, .. }
            | E::QcReportCreated { occurred_at, .. }
            | E::GoodsSubmitted { occurred_at }
            | E::FinalPaymentRequested { occurred_at, .. }
            | E::DeliveryStarted { occurred_at, .. }
            | E::Delivered { occurred_at }
            | E::DeliveryConfirmed { occurred_at, .. }
            | E::DepositRecorded { occurred_at, .. }
            | E::TrackingAdvanced { occurred_at, .. }
            | E::Reset { occurred_at, .. }
            | E::SellerAssigned { occurred_at, .. }
            | E::SellerQuotationSubmitted { occurred_at, .. }
            | E::SellerResponded { occurred_at, .. }
            | E::SellerTrackingAdvanced { occurred_at, .. }
            | E::PicAssigned { occurred_at, .. }
            | E::PaymentLinkAttached { occurred_at, .. } => *occurred_at,
        }
    }
}

impl BulkPurchaseOrderEvent {
    /// The milestone whose transaction this event settles, if any.
    pub fn settled_milestone(&self) -> Option<Milestone> {
        match self {
            BulkPurchaseOrderEvent::CardPaymentConfirmed { milestone, .. }
            | BulkPurchaseOrderEvent::MarkedAsPaid { milestone, .. } => Some(*milestone),
            _ => None,
        }
    }
}

fn tracking_entry(
    action: AuditAction,
    description: impl Into<String>,
    before: BulkTrackingStatus,
    after: BulkTrackingStatus,
) -> AuditEntry {
    AuditEntry::new(action, description).change("tracking_status", before, after)
}

impl Auditable for BulkPurchaseOrderEvent {
    fn audit_entry(&self) -> Option<AuditEntry> {
        use BulkPurchaseOrderEvent as E;
        use BulkTrackingStatus as S;

        let entry = match self {
            E::Created { reference_id, .. } => AuditEntry::new(
                AuditAction::InquiryBulkPoCreated,
                format!("Bulk order {reference_id} created"),
            )
            .with("tracking_status", S::New),
            E::SubmissionRequested { .. } => tracking_entry(
                AuditAction::BulkPoSubmissionRequested,
                "Buyer asked to submit the order",
                S::New,
                S::WaitingForSubmitOrder,
            ),
            E::OrderSubmitted {
                tracking_before,
                items,
                ..
            } => tracking_entry(
                AuditAction::BulkPoSubmitted,
                "Bulk order submitted",
                *tracking_before,
                S::WaitingForQuotation,
            )
            .with("items", items),
            E::QuotationSent {
                quotations,
                plan,
                tracking_before,
                tracking_after,
                first_payment_skipped,
                ..
            } => tracking_entry(
                AuditAction::BulkPoAdminSendQuotation,
                "Quotation sent to buyer",
                *tracking_before,
                *tracking_after,
            )
            .with("quotations", quotations)
            .with("first_payment_percentage", plan.first_percentage)
            .with("second_payment_percentage", plan.second_percentage)
            .with("first_payment_skipped", first_payment_skipped),
            E::PricingApplied {
                before_total,
                after,
                ..
            } => AuditEntry::new(AuditAction::BulkPoPricingUpdated, "Bulk pricing updated")
                .change("total", before_total, after.total)
                .with("first_payment_total", after.first.total)
                .with("second_payment_total", after.second.total)
                .with("final_payment_total", after.final_.total),
            E::BankTransferSubmitted {
                milestone,
                tracking_before,
                tracking_after,
                transaction_ref_id,
                amount,
                ..
            } => tracking_entry(
                AuditAction::BulkPoPaymentSubmitted,
                format!("Bank transfer submitted for {milestone}"),
                *tracking_before,
                *tracking_after,
            )
            .with("milestone", milestone)
            .with("transaction_ref_id", transaction_ref_id)
            .with("amount", amount),
            E::PaymentActionRequired {
                milestone,
                payment_intent_id,
                ..
            } => AuditEntry::new(
                AuditAction::BulkPoPaymentRequiresAction,
                format!("Card payment for {milestone} requires action"),
            )
            .with("milestone", milestone)
            .with("payment_intent_id", payment_intent_id),
            E::CardPaymentConfirmed {
                milestone,
                payment_intent_id,
                tracking_before,
                tracking_after,
                amount,
                ..
            } => tracking_entry(
                AuditAction::BulkPoCardPaid,
                format!("Card payment for {milestone} succeeded"),
                *tracking_before,
                *tracking_after,
            )
            .with("milestone", milestone)
            .with("payment_intent_id", payment_intent_id)
            .with("amount", amount),
            E::MarkedAsPaid {
                milestone,
                tracking_before,
                tracking_after,
                expected_amount,
                recorded_amount,
                ..
            } => {
                let entry = tracking_entry(
                    AuditAction::BulkPoMarkAsPaid,
                    format!("Admin marked {milestone} as paid"),
                    *tracking_before,
                    *tracking_after,
                )
                .with("milestone", milestone)
                .with("amount", expected_amount);
                match recorded_amount {
                    Some(recorded) if recorded != expected_amount => entry
                        .with("recorded_amount", recorded)
                        .with("amount_mismatch", true),
                    _ => entry,
                }
            }
            E::MarkedAsUnpaid { milestone, note, .. } => AuditEntry::new(
                AuditAction::BulkPoMarkAsUnpaid,
                format!("Admin marked {milestone} as unpaid"),
            )
            .with("milestone", milestone)
            .with("note", note),
            E::SecondPaymentRequested { tracking_before, .. } => tracking_entry(
                AuditAction::BulkPoSecondPaymentRequested,
                "Second payment requested",
                *tracking_before,
                S::SecondPayment,
            ),
            E::ChecklistUpdated {
                kind,
                before,
                after,
                tracking_before,
                tracking_after,
                ..
            } => {
                let action = match kind {
                    ChecklistKind::RawMaterial => AuditAction::BulkPoRawMaterialUpdated,
                    ChecklistKind::Pps => AuditAction::BulkPoPpsUpdated,
                    ChecklistKind::Production => AuditAction::BulkPoProductionUpdated,
                };
                tracking_entry(
                    action,
                    format!("{} updated", kind.as_str()),
                    *tracking_before,
                    *tracking_after,
                )
                .change(kind.as_str(), before, after)
            }
            E::RawMaterialApproved { before, after, .. } => AuditEntry::new(
                AuditAction::BulkPoBuyerApproveRawMaterial,
                "Buyer approved raw materials",
            )
            .change(ChecklistKind::RawMaterial.as_str(), before, after),
            E::QcReportCreated {
                report,
                tracking_before,
                tracking_after,
                ..
            } => tracking_entry(
                AuditAction::BulkPoQcReportCreated,
                "QC report created",
                *tracking_before,
                *tracking_after,
            )
            .with("qc_report", report),
            E::GoodsSubmitted { .. } => tracking_entry(
                AuditAction::BulkPoGoodsSubmitted,
                "Goods submitted",
                S::Qc,
                S::Submit,
            ),
            E::FinalPaymentRequested {
                terms,
                tracking_before,
                ..
            } => tracking_entry(
                AuditAction::BulkPoFinalPaymentRequested,
                "Final payment requested",
                *tracking_before,
                S::FinalPayment,
            )
            .with("shipping_fee", terms.shipping_fee)
            .with("commercial_invoice", &terms.commercial_invoice)
            .with("additional_items", &terms.additional_items)
            .with("deduct_sample", terms.deduct_sample),
            E::DeliveryStarted {
                logistic_info,
                tracking_before,
                ..
            } => tracking_entry(
                AuditAction::BulkPoDelivering,
                "Goods are on the way",
                *tracking_before,
                S::Delivering,
            )
            .with("logistic_info", logistic_info),
            E::Delivered { .. } => tracking_entry(
                AuditAction::BulkPoDelivered,
                "Goods delivered",
                S::Delivering,
                S::Delivered,
            ),
            E::DeliveryConfirmed { tracking_before, .. } => tracking_entry(
                AuditAction::BulkPoDeliveryConfirmed,
                "Buyer confirmed delivery",
                *tracking_before,
                S::DeliveryConfirmed,
            ),
            E::DepositRecorded {
                amount,
                is_paid,
                total_before,
                ..
            } => AuditEntry::new(AuditAction::BulkPoDepositCreated, "Deposit recorded")
                .change(
                    "deposit",
                    total_before,
                    if *is_paid { *total_before + *amount } else { *total_before },
                )
                .with("amount", amount)
                .with("is_paid", is_paid),
            E::TrackingAdvanced { before, after, .. } => tracking_entry(
                AuditAction::BulkPoTrackingStatus,
                "Tracking status updated",
                *before,
                *after,
            ),
            E::Reset {
                tracking_before,
                items_before,
                ..
            } => tracking_entry(AuditAction::BulkPoReset, "Bulk order reset", *tracking_before, S::New)
                .change("items", items_before, Vec::<CartItem>::new()),
            E::SellerAssigned { before, after, .. } => {
                AuditEntry::new(AuditAction::BulkPoSellerAssigned, "Seller assigned")
                    .change("seller", before, after)
                    .with("seller_tracking_status", SellerTrackingStatus::Po)
            }
            E::SellerQuotationSubmitted { quotation, .. } => AuditEntry::new(
                AuditAction::BulkPoSellerQuotationSubmitted,
                "Seller submitted a quotation",
            )
            .with("seller_quotation", quotation),
            E::SellerResponded { accepted, after, .. } => AuditEntry::new(
                AuditAction::BulkPoSellerResponded,
                if *accepted { "Seller accepted the PO" } else { "Seller rejected the PO" },
            )
            .change("seller_tracking_status", SellerTrackingStatus::Po, after),
            E::SellerTrackingAdvanced { before, after, .. } => AuditEntry::new(
                AuditAction::BulkPoSellerTrackingStatus,
                "Seller tracking status updated",
            )
            .change("seller_tracking_status", before, after),
            E::PicAssigned { before, after, .. } => {
                AuditEntry::new(AuditAction::BulkPoAssignPic, "Assignees updated")
                    .change("assignee_ids", before, after)
            }
            E::PaymentLinkAttached { milestone, link, .. } => AuditEntry::new(
                AuditAction::BulkPoPaymentLinkCreated,
                format!("Payment link created for {milestone}"),
            )
            .with("milestone", milestone)
            .with("payment_link", link),
        };
        Some(entry)
    }
}

impl Aggregate for BulkPurchaseOrder {
    type Command = BulkPurchaseOrderCommand;
    type Event = BulkPurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        use BulkPurchaseOrderEvent as E;

        match event {
            E::Created {
                order_id,
                reference_id,
                purchase_order_id,
                inquiry_id,
                buyer_id,
                currency,
                items,
                quotations,
                tax_percentage,
                shipping_fee,
                sample_total,
                occurred_at,
            } => {
                self.id = *order_id;
                self.reference_id = reference_id.clone();
                self.purchase_order_id = Some(*purchase_order_id);
                self.inquiry_id = Some(*inquiry_id);
                self.buyer_id = Some(*buyer_id);
                self.currency = *currency;
                self.items = items.clone();
                self.quotations = quotations.clone();
                self.tax_percentage = *tax_percentage;
                self.shipping_fee = *shipping_fee;
                self.sample_total = *sample_total;
                self.tracking_status = BulkTrackingStatus::New;
                self.created_at = Some(*occurred_at);
                self.created = true;
            }
            E::SubmissionRequested { .. } => {
                self.tracking_status = BulkTrackingStatus::WaitingForSubmitOrder;
            }
            E::OrderSubmitted { items, .. } => {
                self.items = items.clone();
                self.tracking_status = BulkTrackingStatus::WaitingForQuotation;
            }
            E::QuotationSent {
                quotations,
                plan,
                tax_percentage,
                shipping_fee,
                tracking_after,
                first_payment_skipped,
                lead_time,
                occurred_at,
                ..
            } => {
                self.quotations = quotations.clone();
                self.plan = *plan;
                self.tax_percentage = *tax_percentage;
                self.shipping_fee = *shipping_fee;
                self.tracking_status = *tracking_after;
                if *first_payment_skipped {
                    self.milestone_mut(Milestone::First).mark_as_paid_at = Some(*occurred_at);
                }
                if lead_time.is_some() {
                    self.lead_time = *lead_time;
                }
                self.pricing = None;
            }
            E::PricingApplied { after, .. } => {
                self.items = after.items.clone();
                self.additional_items = after.additional_items.clone();
                for m in [Milestone::First, Milestone::Second, Milestone::Final] {
                    if let Some(amounts) = after.milestone(m) {
                        self.payment_types.set(m, amounts.payment_type);
                    }
                }
                self.pricing = Some(after.clone());
            }
            E::BankTransferSubmitted {
                milestone,
                tracking_after,
                transaction_ref_id,
                attachments,
                occurred_at,
                ..
            } => {
                let state = self.milestone_mut(*milestone);
                state.payment_type = PaymentType::BankTransfer;
                state.transaction_ref_id = transaction_ref_id.clone();
                state.attachments = attachments.clone();
                state.transfered_at = Some(*occurred_at);
                state.awaiting_confirmation = true;
                self.tracking_status = *tracking_after;
            }
            E::PaymentActionRequired {
                milestone,
                payment_intent_id,
                next_action,
                ..
            } => {
                let state = self.milestone_mut(*milestone);
                state.payment_type = PaymentType::Card;
                state.payment_intent_id = Some(payment_intent_id.clone());
                state.next_action = next_action.clone();
            }
            E::CardPaymentConfirmed {
                milestone,
                payment_intent_id,
                tracking_after,
                lead_time,
                occurred_at,
                ..
            } => {
                let state = self.milestone_mut(*milestone);
                state.payment_type = PaymentType::Card;
                state.payment_intent_id = Some(payment_intent_id.clone());
                state.next_action = None;
                state.mark_as_paid_at = Some(*occurred_at);
                state.received_at = Some(*occurred_at);
                self.tracking_status = *tracking_after;
                if lead_time.is_some() {
                    self.lead_time = *lead_time;
                }
            }
            E::MarkedAsPaid {
                milestone,
                tracking_after,
                expected_amount,
                lead_time,
                occurred_at,
                ..
            } => {
                if *milestone == Milestone::Deposit {
                    self.deposit += *expected_amount;
                    self.pending_deposit = Decimal::ZERO;
                }
                let state = self.milestone_mut(*milestone);
                state.awaiting_confirmation = false;
                state.mark_as_paid_at = Some(*occurred_at);
                state.received_at = Some(*occurred_at);
                self.tracking_status = *tracking_after;
                if lead_time.is_some() {
                    self.lead_time = *lead_time;
                }
            }
            E::MarkedAsUnpaid {
                milestone,
                occurred_at,
                ..
            } => {
                if *milestone == Milestone::Deposit {
                    self.pending_deposit = Decimal::ZERO;
                }
                let state = self.milestone_mut(*milestone);
                state.awaiting_confirmation = false;
                state.mark_as_unpaid_at = Some(*occurred_at);
            }
            E::SecondPaymentRequested { .. } => {
                self.tracking_status = BulkTrackingStatus::SecondPayment;
            }
            E::ChecklistUpdated {
                kind,
                after,
                tracking_after,
                ..
            } => {
                *self.checklist_mut(*kind) = after.clone();
                self.tracking_status = *tracking_after;
            }
            E::RawMaterialApproved { after, .. } => {
                self.raw_materials = after.clone();
            }
            E::QcReportCreated {
                report,
                tracking_after,
                ..
            } => {
                self.qc_reports.push(report.clone());
                self.tracking_status = *tracking_after;
            }
            E::GoodsSubmitted { .. } => {
                self.tracking_status = BulkTrackingStatus::Submit;
            }
            E::FinalPaymentRequested { terms, .. } => {
                if let Some(fee) = terms.shipping_fee {
                    self.shipping_fee = fee;
                }
                if terms.commercial_invoice.is_some() {
                    self.commercial_invoice = terms.commercial_invoice.clone();
                }
                self.additional_items = terms.additional_items.clone();
                self.deduct_sample = terms.deduct_sample;
                self.tracking_status = BulkTrackingStatus::FinalPayment;
            }
            E::DeliveryStarted { logistic_info, .. } => {
                self.logistic_info = Some(logistic_info.clone());
                self.tracking_status = BulkTrackingStatus::Delivering;
            }
            E::Delivered { occurred_at } => {
                self.delivered_at = Some(*occurred_at);
                self.tracking_status = BulkTrackingStatus::Delivered;
            }
            E::DeliveryConfirmed { occurred_at, .. } => {
                self.receiver_confirmed_at = Some(*occurred_at);
                self.tracking_status = BulkTrackingStatus::DeliveryConfirmed;
            }
            E::DepositRecorded {
                amount,
                is_paid,
                occurred_at,
                ..
            } => {
                if *is_paid {
                    self.deposit += *amount;
                } else {
                    self.pending_deposit += *amount;
                }
                let state = self.milestone_mut(Milestone::Deposit);
                if *is_paid {
                    state.mark_as_paid_at = Some(*occurred_at);
                    state.received_at = Some(*occurred_at);
                } else {
                    state.awaiting_confirmation = true;
                }
            }
            E::TrackingAdvanced { after, .. } => {
                self.tracking_status = *after;
            }
            E::Reset { .. } => {
                self.tracking_status = BulkTrackingStatus::New;
                self.items.clear();
                self.pricing = None;
                self.pending_deposit = Decimal::ZERO;
                self.milestones.retain(|milestone, _| *milestone == Milestone::Deposit);
                if let Some(deposit) = self.milestones.get_mut(&Milestone::Deposit) {
                    deposit.awaiting_confirmation = false;
                }
                self.payment_links.clear();
            }
            E::SellerAssigned { after, .. } => {
                self.seller = Some(*after);
                self.seller_tracking_status = Some(SellerTrackingStatus::Po);
            }
            E::SellerQuotationSubmitted { quotation, .. } => {
                self.seller_quotations.retain(|q| q.seller_id != quotation.seller_id);
                self.seller_quotations.push(quotation.clone());
            }
            E::SellerResponded { after, .. } => {
                self.seller_tracking_status = Some(*after);
            }
            E::SellerTrackingAdvanced { after, .. } => {
                self.seller_tracking_status = Some(*after);
            }
            E::PicAssigned { after, .. } => {
                self.assignee_ids = after.clone();
            }
            E::PaymentLinkAttached { milestone, link, .. } => {
                self.payment_links.insert(*milestone, link.clone());
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        use BulkPurchaseOrderCommand as C;
        use BulkPurchaseOrderEvent as E;

        let creating = matches!(command, C::Create(_));
        if !creating && !self.created {
            return Err(DomainError::not_found());
        }

        match command {
            C::Create(cmd) => self.handle_create(cmd),
            C::RequestSubmission { occurred_at } => {
                self.tracking_status
                    .transition(BulkTrackingTrigger::RequestSubmission)?;
                Ok(vec![E::SubmissionRequested {
                    occurred_at: *occurred_at,
                }])
            }
            C::SubmitOrder { items, occurred_at } => {
                self.tracking_status.transition(BulkTrackingTrigger::SubmitOrder)?;
                let items = items.clone().unwrap_or_else(|| self.items.clone());
                if items.is_empty() {
                    return Err(DomainError::validation("at least one item is required"));
                }
                validate_items(&items)?;
                Ok(vec![E::OrderSubmitted {
                    tracking_before: self.tracking_status,
                    items,
                    occurred_at: *occurred_at,
                }])
            }
            C::SendQuotation(cmd) => self.handle_send_quotation(cmd),
            C::ApplyPricing {
                pricing,
                occurred_at,
            } => Ok(self.handle_apply_pricing(pricing, *occurred_at)),
            C::SubmitBankTransfer {
                milestone,
                payer_id,
                transaction_ref_id,
                attachments,
                occurred_at,
            } => {
                self.ensure_payable(*milestone)?;
                let amount = self.ensure_priced()?.amount_due(*milestone);
                if transaction_ref_id.as_deref().is_none_or(|r| r.trim().is_empty())
                    && attachments.is_empty()
                {
                    return Err(DomainError::validation(
                        "a transfer reference or a receipt attachment is required",
                    ));
                }
                let next = self
                    .tracking_status
                    .transition(BulkTrackingTrigger::SubmitPayment(*milestone))?;
                Ok(vec![E::BankTransferSubmitted {
                    milestone: *milestone,
                    payer_id: *payer_id,
                    tracking_before: self.tracking_status,
                    tracking_after: next,
                    transaction_ref_id: transaction_ref_id.clone(),
                    attachments: attachments.clone(),
                    amount,
                    occurred_at: *occurred_at,
                }])
            }
            C::RecordPaymentAction {
                milestone,
                payment_intent_id,
                next_action,
                occurred_at,
            } => {
                self.ensure_payable(*milestone)?;
                Ok(vec![E::PaymentActionRequired {
                    milestone: *milestone,
                    payment_intent_id: payment_intent_id.clone(),
                    next_action: next_action.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            C::ConfirmCardPayment {
                milestone,
                payment_intent_id,
                occurred_at,
            } => {
                if self.is_settled(*milestone) {
                    return Err(DomainError::already_paid(format!("{milestone} is already paid")));
                }
                let amount = self.ensure_priced()?.amount_due(*milestone);
                let next = self
                    .tracking_status
                    .transition(BulkTrackingTrigger::ConfirmPayment(*milestone))?;
                Ok(vec![E::CardPaymentConfirmed {
                    milestone: *milestone,
                    payment_intent_id: payment_intent_id.clone(),
                    tracking_before: self.tracking_status,
                    tracking_after: next,
                    amount,
                    lead_time: self.production_lead_time(*milestone, *occurred_at),
                    occurred_at: *occurred_at,
                }])
            }
            C::MarkAsPaid {
                milestone,
                admin_id,
                recorded_amount,
                occurred_at,
            } => self.handle_mark_paid(*milestone, *admin_id, *recorded_amount, *occurred_at),
            C::MarkAsUnpaid {
                milestone,
                admin_id,
                note,
                occurred_at,
            } => {
                if self.is_settled(*milestone) {
                    return Err(DomainError::already_paid(format!("{milestone} is already paid")));
                }
                if !self.milestone(*milestone).is_some_and(|s| s.awaiting_confirmation) {
                    return Err(DomainError::invalid_state(format!(
                        "no {milestone} transfer is waiting for confirmation"
                    )));
                }
                Ok(vec![E::MarkedAsUnpaid {
                    milestone: *milestone,
                    admin_id: *admin_id,
                    note: note.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            C::RequestSecondPayment { occurred_at } => {
                if !self.plan.has_second_payment() {
                    return Err(DomainError::invalid_state("no second payment is planned"));
                }
                self.tracking_status
                    .transition(BulkTrackingTrigger::RequestSecondPayment)?;
                Ok(vec![E::SecondPaymentRequested {
                    tracking_before: self.tracking_status,
                    occurred_at: *occurred_at,
                }])
            }
            C::UpsertChecklistItem {
                kind,
                item,
                occurred_at,
            } => self.handle_upsert_checklist(*kind, item, *occurred_at),
            C::BuyerApproveRawMaterial {
                buyer_id,
                item_ids,
                occurred_at,
            } => {
                if self.buyer_id != Some(*buyer_id) {
                    return Err(DomainError::not_found());
                }
                match checklist::approve(&self.raw_materials, item_ids, *occurred_at) {
                    None => Ok(vec![]),
                    Some(after) => Ok(vec![E::RawMaterialApproved {
                        buyer_id: *buyer_id,
                        before: self.raw_materials.clone(),
                        after,
                        occurred_at: *occurred_at,
                    }]),
                }
            }
            C::CreateQcReport {
                report,
                occurred_at,
            } => {
                self.ensure_production_gate()?;
                let next = self
                    .tracking_status
                    .transition(BulkTrackingTrigger::CreateQcReport)?;
                Ok(vec![E::QcReportCreated {
                    report: report.clone(),
                    tracking_before: self.tracking_status,
                    tracking_after: next,
                    occurred_at: *occurred_at,
                }])
            }
            C::SubmitGoods { occurred_at } => {
                self.tracking_status.transition(BulkTrackingTrigger::SubmitGoods)?;
                Ok(vec![E::GoodsSubmitted {
                    occurred_at: *occurred_at,
                }])
            }
            C::MarkFinalPayment {
                admin_id,
                terms,
                occurred_at,
            } => {
                self.ensure_production_gate()?;
                if self.is_settled(Milestone::Final) {
                    return Err(DomainError::already_paid("final payment is already paid"));
                }
                self.tracking_status
                    .transition(BulkTrackingTrigger::MarkFinalPayment)?;
                if terms.shipping_fee.is_some_and(|f| f < Decimal::ZERO) {
                    return Err(DomainError::validation("shipping fee cannot be negative"));
                }
                Ok(vec![E::FinalPaymentRequested {
                    admin_id: *admin_id,
                    terms: terms.clone(),
                    tracking_before: self.tracking_status,
                    occurred_at: *occurred_at,
                }])
            }
            C::MarkDelivering {
                logistic_info,
                occurred_at,
            } => {
                self.tracking_status
                    .transition(BulkTrackingTrigger::MarkDelivering)?;
                Ok(vec![E::DeliveryStarted {
                    logistic_info: logistic_info.clone(),
                    tracking_before: self.tracking_status,
                    occurred_at: *occurred_at,
                }])
            }
            C::MarkDelivered { occurred_at } => {
                self.tracking_status
                    .transition(BulkTrackingTrigger::MarkDelivered)?;
                Ok(vec![E::Delivered {
                    occurred_at: *occurred_at,
                }])
            }
            C::ConfirmDelivered {
                buyer_id,
                occurred_at,
            } => {
                if self.buyer_id != Some(*buyer_id) {
                    return Err(DomainError::not_found());
                }
                self.tracking_status
                    .transition(BulkTrackingTrigger::ConfirmDelivered)?;
                Ok(vec![E::DeliveryConfirmed {
                    buyer_id: *buyer_id,
                    tracking_before: self.tracking_status,
                    occurred_at: *occurred_at,
                }])
            }
            C::RecordDeposit {
                amount,
                is_paid,
                occurred_at,
            } => {
                if *amount <= Decimal::ZERO {
                    return Err(DomainError::validation("deposit must be positive"));
                }
                if self.tracking_status >= BulkTrackingStatus::FinalPayment {
                    return Err(DomainError::invalid_state(
                        "deposits are only accepted before the final payment",
                    ));
                }
                if self.is_settled(Milestone::Deposit) {
                    return Err(DomainError::already_paid("a deposit has already been paid"));
                }
                if self.pending_deposit > Decimal::ZERO {
                    return Err(DomainError::invalid_state("a deposit is waiting for confirmation"));
                }
                self.ensure_deposit_fits(*amount)?;
                Ok(vec![E::DepositRecorded {
                    amount: *amount,
                    is_paid: *is_paid,
                    total_before: self.deposit,
                    occurred_at: *occurred_at,
                }])
            }
            C::AdvanceTracking {
                target,
                occurred_at,
            } => {
                let next = self
                    .tracking_status
                    .transition(BulkTrackingTrigger::Advance(*target))?;
                if next == self.tracking_status {
                    return Ok(vec![]);
                }
                Ok(vec![E::TrackingAdvanced {
                    before: self.tracking_status,
                    after: next,
                    occurred_at: *occurred_at,
                }])
            }
            C::Reset { occurred_at } => {
                if self.has_received_first_payment() {
                    return Err(DomainError::already_paid(
                        "cannot reset an order whose first payment was received",
                    ));
                }
                Ok(vec![E::Reset {
                    tracking_before: self.tracking_status,
                    items_before: self.items.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            C::AssignSeller {
                seller,
                occurred_at,
            } => {
                if matches!(
                    self.seller_tracking_status,
                    Some(status) if status != SellerTrackingStatus::Po && status != SellerTrackingStatus::PoRejected
                ) {
                    return Err(DomainError::invalid_state(
                        "seller already accepted the PO",
                    ));
                }
                if self.seller == Some(*seller)
                    && self.seller_tracking_status == Some(SellerTrackingStatus::Po)
                {
                    return Ok(vec![]);
                }
                Ok(vec![E::SellerAssigned {
                    before: self.seller,
                    after: *seller,
                    occurred_at: *occurred_at,
                }])
            }
            C::SubmitSellerQuotation {
                seller_id,
                price,
                lead_time_days,
                occurred_at,
            } => {
                if *price <= Decimal::ZERO {
                    return Err(DomainError::validation("quoted price must be positive"));
                }
                Ok(vec![E::SellerQuotationSubmitted {
                    quotation: SellerQuotation {
                        seller_id: *seller_id,
                        price: *price,
                        lead_time_days: *lead_time_days,
                        submitted_at: *occurred_at,
                    },
                    occurred_at: *occurred_at,
                }])
            }
            C::RespondToPo {
                seller_id,
                accept,
                occurred_at,
            } => {
                if self.seller.and_then(SellerRef::seller_id) != Some(*seller_id) {
                    return Err(DomainError::not_found());
                }
                let current = self
                    .seller_tracking_status
                    .ok_or_else(|| DomainError::invalid_state("no PO was sent to a seller"))?;
                let trigger = if *accept {
                    SellerTrigger::Accept
                } else {
                    SellerTrigger::Reject
                };
                Ok(vec![E::SellerResponded {
                    seller_id: *seller_id,
                    accepted: *accept,
                    after: current.transition(trigger)?,
                    occurred_at: *occurred_at,
                }])
            }
            C::AdvanceSellerTracking {
                target,
                occurred_at,
            } => {
                let current = self
                    .seller_tracking_status
                    .ok_or_else(|| DomainError::invalid_state("no seller is assigned"))?;
                Ok(vec![E::SellerTrackingAdvanced {
                    before: current,
                    after: current.transition(SellerTrigger::Advance(*target))?,
                    occurred_at: *occurred_at,
                }])
            }
            C::AssignPic {
                assignee_ids,
                occurred_at,
            } => {
                if assignee_ids == &self.assignee_ids {
                    return Ok(vec![]);
                }
                Ok(vec![E::PicAssigned {
                    before: self.assignee_ids.clone(),
                    after: assignee_ids.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            C::AttachPaymentLink {
                milestone,
                link,
                occurred_at,
            } => {
                self.ensure_payable(*milestone)?;
                self.ensure_priced()?;
                Ok(vec![E::PaymentLinkAttached {
                    milestone: *milestone,
                    link: link.clone(),
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl BulkPurchaseOrder {
    fn handle_create(
        &self,
        cmd: &CreateBulkPurchaseOrder,
    ) -> Result<Vec<BulkPurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("bulk purchase order already exists"));
        }
        validate_items(&cmd.items)?;

        Ok(vec![BulkPurchaseOrderEvent::Created {
            order_id: cmd.order_id,
            reference_id: cmd.reference_id.clone(),
            purchase_order_id: cmd.purchase_order_id,
            inquiry_id: cmd.inquiry_id,
            buyer_id: cmd.buyer_id,
            currency: cmd.currency,
            items: cmd.items.clone(),
            quotations: cmd.quotations.clone(),
            tax_percentage: cmd.tax_percentage,
            shipping_fee: cmd.shipping_fee,
            sample_total: cmd.sample_total,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_send_quotation(
        &self,
        cmd: &SendQuotation,
    ) -> Result<Vec<BulkPurchaseOrderEvent>, DomainError> {
        cmd.plan.validate()?;
        if Quotation::find(&cmd.quotations, QuotationKind::Bulk).is_none() {
            return Err(DomainError::validation("a bulk quotation is required"));
        }
        if cmd.shipping_fee < Decimal::ZERO || cmd.tax_percentage < Decimal::ZERO {
            return Err(DomainError::validation("shipping fee and tax cannot be negative"));
        }

        let skipped = cmd.plan.skips_first_payment();
        let trigger = if skipped {
            BulkTrackingTrigger::SkipFirstPayment
        } else {
            BulkTrackingTrigger::SendQuotation
        };
        let next = self.tracking_status.transition(trigger)?;

        let lead_time = if skipped && self.lead_time.is_none() {
            Quotation::find(&cmd.quotations, QuotationKind::Bulk)
                .map(|q| LeadTime::starting(q.lead_time_days, cmd.occurred_at))
        } else {
            None
        };

        Ok(vec![BulkPurchaseOrderEvent::QuotationSent {
            admin_id: cmd.admin_id,
            quotations: cmd.quotations.clone(),
            plan: cmd.plan,
            tax_percentage: cmd.tax_percentage,
            shipping_fee: cmd.shipping_fee,
            tracking_before: self.tracking_status,
            tracking_after: next,
            first_payment_skipped: skipped,
            lead_time,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_apply_pricing(
        &self,
        pricing: &BulkPricing,
        occurred_at: DateTime<Utc>,
    ) -> Vec<BulkPurchaseOrderEvent> {
        if self.is_settled(Milestone::Final) || self.pricing.as_ref() == Some(pricing) {
            return vec![];
        }
        vec![BulkPurchaseOrderEvent::PricingApplied {
            before_total: self.pricing.as_ref().map(|p| p.total),
            after: pricing.clone(),
            occurred_at,
        }]
    }

    fn handle_mark_paid(
        &self,
        milestone: Milestone,
        admin_id: UserId,
        recorded_amount: Option<Decimal>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<BulkPurchaseOrderEvent>, DomainError> {
        if self.is_settled(milestone) {
            return Err(DomainError::already_paid(format!("{milestone} is already paid")));
        }
        let (next, expected_amount) = if milestone == Milestone::Deposit {
            if self.pending_deposit <= Decimal::ZERO {
                return Err(DomainError::invalid_state("no deposit is waiting for confirmation"));
            }
            self.ensure_deposit_fits(self.pending_deposit)?;
            (self.tracking_status, self.pending_deposit)
        } else {
            let amount = self.ensure_priced()?.amount_due(milestone);
            let next = self
                .tracking_status
                .transition(BulkTrackingTrigger::ConfirmPayment(milestone))?;
            (next, amount)
        };

        Ok(vec![BulkPurchaseOrderEvent::MarkedAsPaid {
            milestone,
            admin_id,
            tracking_before: self.tracking_status,
            tracking_after: next,
            expected_amount,
            recorded_amount,
            lead_time: self.production_lead_time(milestone, occurred_at),
            occurred_at,
        }])
    }

    fn handle_upsert_checklist(
        &self,
        kind: ChecklistKind,
        item: &ChecklistItem,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<BulkPurchaseOrderEvent>, DomainError> {
        self.ensure_production_gate()?;
        if item.name.trim().is_empty() {
            return Err(DomainError::validation("checklist item name is required"));
        }
        let trigger = match kind {
            ChecklistKind::RawMaterial => BulkTrackingTrigger::UpdateRawMaterial,
            ChecklistKind::Pps => BulkTrackingTrigger::UpdatePps,
            ChecklistKind::Production => BulkTrackingTrigger::UpdateProduction,
        };
        let next = self.tracking_status.transition(trigger)?;

        let before = self.checklist(kind);
        let stamped = ChecklistItem {
            updated_at: Some(occurred_at),
            ..item.clone()
        };
        let after = checklist::upsert(before, stamped);

        Ok(vec![BulkPurchaseOrderEvent::ChecklistUpdated {
            kind,
            before: before.to_vec(),
            after,
            tracking_before: self.tracking_status,
            tracking_after: next,
            occurred_at,
        }])
    }
}

fn validate_items(items: &[CartItem]) -> DomainResult<()> {
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
    use crate::checklist::{ChecklistStatus, QcStatus};
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn test_quotations() -> Vec<Quotation> {
        vec![Quotation {
            kind: QuotationKind::Bulk,
            price: dec!(10),
            lead_time_days: 30,
            accepted: false,
        }]
    }

    fn execute(
        order: &mut BulkPurchaseOrder,
        cmd: BulkPurchaseOrderCommand,
    ) -> Result<Vec<BulkPurchaseOrderEvent>, DomainError> {
        let events = order.handle(&cmd)?;
        for e in &events {
            order.apply(e);
        }
        Ok(events)
    }

    fn created_order() -> BulkPurchaseOrder {
        let id = BulkPurchaseOrderId::new();
        let mut order = BulkPurchaseOrder::empty(id);
        execute(
            &mut order,
            BulkPurchaseOrderCommand::Create(CreateBulkPurchaseOrder {
                order_id: id,
                reference_id: "BPO-TEST01".into(),
                purchase_order_id: PurchaseOrderId::new(),
                inquiry_id: InquiryId::new(),
                buyer_id: UserId::new(),
                currency: Currency::Usd,
                items: vec![CartItem::new("M", "black", 20, Decimal::ZERO)],
                quotations: vec![],
                tax_percentage: Decimal::ZERO,
                shipping_fee: Decimal::ZERO,
                sample_total: dec!(50),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut order,
            BulkPurchaseOrderCommand::SubmitOrder {
                items: None,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        order
    }

    fn quote(order: &mut BulkPurchaseOrder, first: u32, second: u32) {
        execute(
            order,
            BulkPurchaseOrderCommand::SendQuotation(SendQuotation {
                admin_id: UserId::new(),
                quotations: test_quotations(),
                plan: MilestonePlan::new(first, second).unwrap(),
                tax_percentage: dec!(10),
                shipping_fee: dec!(15),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        reprice(order);
    }

    fn reprice(order: &mut BulkPurchaseOrder) {
        let pricing = order.price(&PricingEngine::new()).unwrap();
        execute(
            order,
            BulkPurchaseOrderCommand::ApplyPricing {
                pricing,
                occurred_at: test_time(),
            },
        )
        .unwrap();
    }

    fn mark_paid(
        order: &mut BulkPurchaseOrder,
        milestone: Milestone,
    ) -> Result<Vec<BulkPurchaseOrderEvent>, DomainError> {
        execute(
            order,
            BulkPurchaseOrderCommand::MarkAsPaid {
                milestone,
                admin_id: UserId::new(),
                recorded_amount: None,
                occurred_at: test_time(),
            },
        )
    }

    fn checklist_item(name: &str) -> ChecklistItem {
        ChecklistItem {
            id: ChecklistItemId::new(),
            name: name.into(),
            description: None,
            status: ChecklistStatus::Pending,
            attachments: vec![],
            updated_at: None,
        }
    }

    fn in_production() -> BulkPurchaseOrder {
        let mut order = created_order();
        quote(&mut order, 30, 0);
        mark_paid(&mut order, Milestone::First).unwrap();
        order
    }

    fn at_final_payment() -> BulkPurchaseOrder {
        let mut order = in_production();
        execute(
            &mut order,
            BulkPurchaseOrderCommand::MarkFinalPayment {
                admin_id: UserId::new(),
                terms: FinalPaymentTerms::default(),
                occurred_at: test_time(),
            },
        )
        .unwrap();
        reprice(&mut order);
        order
    }

    #[test]
    fn test_zero_percent_quotation_skips_first_payment() {
        let mut order = created_order();
        quote(&mut order, 0, 0);

        assert_eq!(order.tracking_status(), BulkTrackingStatus::FirstPaymentConfirmed);
        assert!(order.is_settled(Milestone::First));
        assert_eq!(
            order.milestone(Milestone::First).unwrap().mark_as_paid_at,
            Some(test_time())
        );
        assert_eq!(order.lead_time().unwrap().lead_time_days, 30);
        assert_eq!(order.amount_due(Milestone::First), Decimal::ZERO);
        assert!(order.production_gate_open());
    }

    #[test]
    fn test_quotation_moves_to_first_payment() {
        let mut order = created_order();
        quote(&mut order, 30, 0);
        assert_eq!(order.tracking_status(), BulkTrackingStatus::FirstPayment);
        // 20 x 10 = 200, 30% = 60, tax 10% = 6.
        assert_eq!(order.amount_due(Milestone::First), dec!(66));
    }

    #[test]
    fn test_bank_transfer_final_payment() {
        let mut order = at_final_payment();
        let payer_id = order.buyer_id().unwrap();
        let events = execute(
            &mut order,
            BulkPurchaseOrderCommand::SubmitBankTransfer {
                milestone: Milestone::Final,
                payer_id,
                transaction_ref_id: Some("TX1".into()),
                attachments: vec![Attachment::new("receipts/x.png")],
                occurred_at: test_time(),
            },
        )
        .unwrap();

        match &events[0] {
            BulkPurchaseOrderEvent::BankTransferSubmitted { milestone, amount, .. } => {
                assert_eq!(*milestone, Milestone::Final);
                assert_eq!(*amount, order.amount_due(Milestone::Final));
            }
            _ => panic!("Expected BankTransferSubmitted event"),
        }
        assert_eq!(order.tracking_status(), BulkTrackingStatus::FinalPaymentConfirm);
        assert!(order.milestone(Milestone::Final).unwrap().awaiting_confirmation);
    }

    #[test]
    fn test_mark_unpaid_keeps_tracking_and_allows_resubmission() {
        let mut order = at_final_payment();
        let submit = BulkPurchaseOrderCommand::SubmitBankTransfer {
            milestone: Milestone::Final,
            payer_id: UserId::new(),
            transaction_ref_id: Some("TX1".into()),
            attachments: vec![],
            occurred_at: test_time(),
        };
        execute(&mut order, submit.clone()).unwrap();
        execute(
            &mut order,
            BulkPurchaseOrderCommand::MarkAsUnpaid {
                milestone: Milestone::Final,
                admin_id: UserId::new(),
                note: Some("not received".into()),
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert_eq!(order.tracking_status(), BulkTrackingStatus::FinalPaymentConfirm);

        execute(&mut order, submit).unwrap();
        assert_eq!(order.tracking_status(), BulkTrackingStatus::FinalPaymentConfirm);
    }

    #[test]
    fn test_reset_rejected_after_first_payment_received() {
        let mut order = in_production();
        let before = order.tracking_status();
        match execute(&mut order, BulkPurchaseOrderCommand::Reset { occurred_at: test_time() }) {
            Err(DomainError::AlreadyPaid(_)) => {}
            other => panic!("Expected AlreadyPaid, got {other:?}"),
        }
        assert_eq!(order.tracking_status(), before);
    }

    #[test]
    fn test_reset_clears_items_before_payment() {
        let mut order = created_order();
        quote(&mut order, 30, 0);
        execute(&mut order, BulkPurchaseOrderCommand::Reset { occurred_at: test_time() }).unwrap();
        assert_eq!(order.tracking_status(), BulkTrackingStatus::New);
        assert!(order.items().is_empty());
        assert!(order.pricing().is_none());
    }

    #[test]
    fn test_card_intent_blocks_reset() {
        let mut order = created_order();
        quote(&mut order, 30, 0);
        execute(
            &mut order,
            BulkPurchaseOrderCommand::RecordPaymentAction {
                milestone: Milestone::First,
                payment_intent_id: "pi_1".into(),
                next_action: None,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert_eq!(order.tracking_status(), BulkTrackingStatus::FirstPayment);
        assert!(execute(&mut order, BulkPurchaseOrderCommand::Reset { occurred_at: test_time() }).is_err());
    }

    #[test]
    fn test_double_mark_paid_is_already_paid() {
        let mut order = created_order();
        quote(&mut order, 30, 0);
        mark_paid(&mut order, Milestone::First).unwrap();
        assert_eq!(order.tracking_status(), BulkTrackingStatus::FirstPaymentConfirmed);
        match mark_paid(&mut order, Milestone::First) {
            Err(DomainError::AlreadyPaid(_)) => {}
            other => panic!("Expected AlreadyPaid, got {other:?}"),
        }
    }

    #[test]
    fn test_checklist_requires_planned_second_payment() {
        let mut order = created_order();
        quote(&mut order, 30, 20);
        mark_paid(&mut order, Milestone::First).unwrap();

        let upsert = BulkPurchaseOrderCommand::UpsertChecklistItem {
            kind: ChecklistKind::RawMaterial,
            item: checklist_item("fabric"),
            occurred_at: test_time(),
        };
        assert!(matches!(
            execute(&mut order, upsert.clone()),
            Err(DomainError::InvalidState(_))
        ));

        execute(
            &mut order,
            BulkPurchaseOrderCommand::RequestSecondPayment { occurred_at: test_time() },
        )
        .unwrap();
        mark_paid(&mut order, Milestone::Second).unwrap();
        assert_eq!(order.tracking_status(), BulkTrackingStatus::SecondPaymentConfirmed);

        execute(&mut order, upsert).unwrap();
        assert_eq!(order.tracking_status(), BulkTrackingStatus::RawMaterial);
    }

    #[test]
    fn test_checklist_audit_carries_whole_list() {
        let mut order = in_production();
        let fabric = checklist_item("fabric");
        execute(
            &mut order,
            BulkPurchaseOrderCommand::UpsertChecklistItem {
                kind: ChecklistKind::RawMaterial,
                item: fabric.clone(),
                occurred_at: test_time(),
            },
        )
        .unwrap();
        let events = execute(
            &mut order,
            BulkPurchaseOrderCommand::UpsertChecklistItem {
                kind: ChecklistKind::RawMaterial,
                item: checklist_item("zipper"),
                occurred_at: test_time(),
            },
        )
        .unwrap();

        let entry = events[0].audit_entry().unwrap();
        assert_eq!(entry.action, AuditAction::BulkPoRawMaterialUpdated);
        assert_eq!(entry.before["raw_materials"].as_array().unwrap().len(), 1);
        assert_eq!(entry.after["raw_materials"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_buyer_approval_audits_only_changes() {
        let mut order = in_production();
        execute(
            &mut order,
            BulkPurchaseOrderCommand::UpsertChecklistItem {
                kind: ChecklistKind::RawMaterial,
                item: checklist_item("fabric"),
                occurred_at: test_time(),
            },
        )
        .unwrap();
        let buyer = order.buyer_id().unwrap();
        let approve = BulkPurchaseOrderCommand::BuyerApproveRawMaterial {
            buyer_id: buyer,
            item_ids: vec![],
            occurred_at: test_time(),
        };
        assert_eq!(execute(&mut order, approve.clone()).unwrap().len(), 1);
        assert!(execute(&mut order, approve).unwrap().is_empty());
    }

    #[test]
    fn test_qc_then_final_payment_with_sample_deduction() {
        let mut order = in_production();
        execute(
            &mut order,
            BulkPurchaseOrderCommand::CreateQcReport {
                report: QcReport {
                    id: ChecklistItemId::new(),
                    status: QcStatus::Passed,
                    note: None,
                    attachments: vec![],
                    created_at: test_time(),
                },
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert_eq!(order.tracking_status(), BulkTrackingStatus::Qc);

        let before = order.amount_due(Milestone::Final);
        execute(
            &mut order,
            BulkPurchaseOrderCommand::MarkFinalPayment {
                admin_id: UserId::new(),
                terms: FinalPaymentTerms {
                    deduct_sample: true,
                    ..FinalPaymentTerms::default()
                },
                occurred_at: test_time(),
            },
        )
        .unwrap();
        reprice(&mut order);
        assert_eq!(order.tracking_status(), BulkTrackingStatus::FinalPayment);
        assert_eq!(order.amount_due(Milestone::Final), before - dec!(50));
    }

    #[test]
    fn test_deposit_only_before_final_payment() {
        let mut order = in_production();
        execute(
            &mut order,
            BulkPurchaseOrderCommand::RecordDeposit {
                amount: dec!(20),
                is_paid: true,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert_eq!(order.deposit(), dec!(20));

        let mut order = at_final_payment();
        let result = execute(
            &mut order,
            BulkPurchaseOrderCommand::RecordDeposit {
                amount: dec!(20),
                is_paid: true,
                occurred_at: test_time(),
            },
        );
        assert!(matches!(result, Err(DomainError::InvalidState(_))));
    }

    fn record_deposit(
        order: &mut BulkPurchaseOrder,
        amount: Decimal,
        is_paid: bool,
    ) -> Result<Vec<BulkPurchaseOrderEvent>, DomainError> {
        execute(
            order,
            BulkPurchaseOrderCommand::RecordDeposit {
                amount,
                is_paid,
                occurred_at: test_time(),
            },
        )
    }

    fn mark_unpaid(
        order: &mut BulkPurchaseOrder,
        milestone: Milestone,
    ) -> Result<Vec<BulkPurchaseOrderEvent>, DomainError> {
        execute(
            order,
            BulkPurchaseOrderCommand::MarkAsUnpaid {
                milestone,
                admin_id: UserId::new(),
                note: Some("transfer not received".into()),
                occurred_at: test_time(),
            },
        )
    }

    #[test]
    fn test_unconfirmed_deposit_is_credited_on_confirmation() {
        let mut order = in_production();
        let before = order.amount_due(Milestone::Final);

        record_deposit(&mut order, dec!(25), false).unwrap();
        assert_eq!(order.deposit(), Decimal::ZERO);
        assert_eq!(order.pending_deposit(), dec!(25));
        assert!(!order.is_settled(Milestone::Deposit));
        reprice(&mut order);
        assert_eq!(order.amount_due(Milestone::Final), before);

        let events = mark_paid(&mut order, Milestone::Deposit).unwrap();
        match &events[..] {
            [BulkPurchaseOrderEvent::MarkedAsPaid { expected_amount, .. }] => {
                assert_eq!(*expected_amount, dec!(25));
            }
            other => panic!("Expected MarkedAsPaid, got {other:?}"),
        }
        assert_eq!(order.deposit(), dec!(25));
        assert_eq!(order.pending_deposit(), Decimal::ZERO);
        assert!(order.is_settled(Milestone::Deposit));
        reprice(&mut order);
        assert_eq!(order.amount_due(Milestone::Final), before - dec!(25));
    }

    #[test]
    fn test_rejected_deposit_is_never_credited() {
        let mut order = in_production();
        let before = order.amount_due(Milestone::Final);

        record_deposit(&mut order, dec!(25), false).unwrap();
        mark_unpaid(&mut order, Milestone::Deposit).unwrap();
        assert_eq!(order.deposit(), Decimal::ZERO);
        assert_eq!(order.pending_deposit(), Decimal::ZERO);
        reprice(&mut order);
        assert_eq!(order.amount_due(Milestone::Final), before);

        // Nothing left to confirm or reject.
        match mark_paid(&mut order, Milestone::Deposit) {
            Err(DomainError::InvalidState(_)) => {}
            other => panic!("Expected InvalidState, got {other:?}"),
        }
        match mark_unpaid(&mut order, Milestone::Deposit) {
            Err(DomainError::InvalidState(_)) => {}
            other => panic!("Expected InvalidState, got {other:?}"),
        }
        assert!(!order.is_settled(Milestone::Deposit));
    }

    #[test]
    fn test_paid_deposit_cannot_be_confirmed_or_recorded_again() {
        let mut order = in_production();
        record_deposit(&mut order, dec!(20), true).unwrap();

        match mark_paid(&mut order, Milestone::Deposit) {
            Err(DomainError::AlreadyPaid(_)) => {}
            other => panic!("Expected AlreadyPaid, got {other:?}"),
        }
        match mark_unpaid(&mut order, Milestone::Deposit) {
            Err(DomainError::AlreadyPaid(_)) => {}
            other => panic!("Expected AlreadyPaid, got {other:?}"),
        }
        match record_deposit(&mut order, dec!(5), true) {
            Err(DomainError::AlreadyPaid(_)) => {}
            other => panic!("Expected AlreadyPaid, got {other:?}"),
        }
        assert_eq!(order.deposit(), dec!(20));
    }

    #[test]
    fn test_second_deposit_waits_for_the_pending_one() {
        let mut order = in_production();
        record_deposit(&mut order, dec!(10), false).unwrap();
        match record_deposit(&mut order, dec!(10), false) {
            Err(DomainError::InvalidState(_)) => {}
            other => panic!("Expected InvalidState, got {other:?}"),
        }
        assert_eq!(order.pending_deposit(), dec!(10));
    }

    #[test]
    fn test_deposit_larger_than_final_payment_is_rejected() {
        let mut order = in_production();
        let remaining = order.pricing().unwrap().final_.sub_total;

        match record_deposit(&mut order, dec!(5000), true) {
            Err(DomainError::Pricing(InvalidPricingInput::CreditsExceedFinal { credits, remaining: r })) => {
                assert_eq!(credits, dec!(5000));
                assert_eq!(r, remaining);
            }
            other => panic!("Expected CreditsExceedFinal, got {other:?}"),
        }
        assert_eq!(order.deposit(), Decimal::ZERO);

        // The whole remaining subtotal is still accepted.
        record_deposit(&mut order, remaining, true).unwrap();
        reprice(&mut order);
        assert_eq!(order.pricing().unwrap().final_.sub_total, Decimal::ZERO);
        assert!(order.amount_due(Milestone::Final) >= Decimal::ZERO);
    }

    #[test]
    fn test_reset_drops_pending_deposit() {
        let mut order = created_order();
        quote(&mut order, 30, 0);
        record_deposit(&mut order, dec!(10), false).unwrap();
        execute(&mut order, BulkPurchaseOrderCommand::Reset { occurred_at: test_time() }).unwrap();

        assert_eq!(order.pending_deposit(), Decimal::ZERO);
        assert!(!order.milestone(Milestone::Deposit).is_some_and(|s| s.awaiting_confirmation));
        match mark_paid(&mut order, Milestone::Deposit) {
            Err(DomainError::InvalidState(_)) => {}
            other => panic!("Expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn test_delivery_flow() {
        let mut order = at_final_payment();
        mark_paid(&mut order, Milestone::Final).unwrap();
        execute(
            &mut order,
            BulkPurchaseOrderCommand::MarkDelivering {
                logistic_info: serde_json::json!({"carrier": "DHL", "tracking": "123"}),
                occurred_at: test_time(),
            },
        )
        .unwrap();
        execute(&mut order, BulkPurchaseOrderCommand::MarkDelivered { occurred_at: test_time() }).unwrap();
        let buyer = order.buyer_id().unwrap();
        execute(
            &mut order,
            BulkPurchaseOrderCommand::ConfirmDelivered {
                buyer_id: buyer,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert_eq!(order.tracking_status(), BulkTrackingStatus::DeliveryConfirmed);
        assert_eq!(order.receiver_confirmed_at(), Some(test_time()));
    }

    #[test]
    fn test_seller_visibility_and_response() {
        let mut order = created_order();
        let seller = UserId::new();
        let other = UserId::new();
        assert!(!order.is_visible_to(&Actor::seller(seller)));

        execute(
            &mut order,
            BulkPurchaseOrderCommand::SubmitSellerQuotation {
                seller_id: other,
                price: dec!(8),
                lead_time_days: 20,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert!(order.is_visible_to(&Actor::seller(other)));

        execute(
            &mut order,
            BulkPurchaseOrderCommand::AssignSeller {
                seller: SellerRef::Seller(seller),
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert!(order.is_visible_to(&Actor::seller(seller)));
        assert_eq!(order.seller_tracking_status(), Some(SellerTrackingStatus::Po));

        let wrong = execute(
            &mut order,
            BulkPurchaseOrderCommand::RespondToPo {
                seller_id: other,
                accept: true,
                occurred_at: test_time(),
            },
        );
        assert_eq!(wrong.unwrap_err(), DomainError::NotFound);

        execute(
            &mut order,
            BulkPurchaseOrderCommand::RespondToPo {
                seller_id: seller,
                accept: true,
                occurred_at: test_time(),
            },
        )
        .unwrap();
        assert_eq!(
            order.seller_tracking_status(),
            Some(SellerTrackingStatus::WaitingFirstPayment)
        );
    }

    #[test]
    fn test_preview_unchanged_is_noop() {
        let mut order = created_order();
        quote(&mut order, 30, 0);
        let version = order.version();
        reprice(&mut order);
        assert_eq!(order.version(), version);
    }
}
