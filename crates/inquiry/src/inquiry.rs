use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use inflow_core::{
    Actor, Aggregate, AggregateRoot, Attachment, AuditAction, AuditEntry, Auditable, Currency,
    DomainError, Event, InquiryId, StateMachine, UserId,
};
use inflow_pricing::{Quotation, QuotationKind};

use crate::status::{BuyerQuotationStatus, BuyerQuotationTrigger, InquiryStatus, InquiryTrigger};

/// Buyer edits are accepted for this long after creation unless an admin moves the deadline.
pub const DEFAULT_EDIT_WINDOW_HOURS: i64 = 24;

/// Aggregate root: Inquiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inquiry {
    id: InquiryId,
    reference_id: String,
    buyer_id: Option<UserId>,
    title: String,
    specification: Value,
    currency: Currency,
    quantity: Option<i64>,
    tax_percentage: Decimal,
    shipping_fee: Decimal,
    product_weight: Option<Decimal>,
    quotations: Vec<Quotation>,
    status: InquiryStatus,
    buyer_quotation_status: BuyerQuotationStatus,
    quotation_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    edit_timeout: Option<DateTime<Utc>>,
    assignee_ids: Vec<UserId>,
    attachments: Vec<Attachment>,
    close_reason: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Inquiry {
    /// Create an empty, not-yet-created instance for the create command.
    pub fn empty(id: InquiryId) -> Self {
        Self {
            id,
            reference_id: String::new(),
            buyer_id: None,
            title: String::new(),
            specification: Value::Null,
            currency: Currency::Usd,
            quantity: None,
            tax_percentage: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            product_weight: None,
            quotations: Vec::new(),
            status: InquiryStatus::New,
            buyer_quotation_status: BuyerQuotationStatus::New,
            quotation_at: None,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            edit_timeout: None,
            assignee_ids: Vec::new(),
            attachments: Vec::new(),
            close_reason: None,
            deleted_at: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InquiryId {
        self.id
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    pub fn buyer_id(&self) -> Option<UserId> {
        self.buyer_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn specification(&self) -> &Value {
        &self.specification
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn quantity(&self) -> Option<i64> {
        self.quantity
    }

    pub fn tax_percentage(&self) -> Decimal {
        self.tax_percentage
    }

    pub fn shipping_fee(&self) -> Decimal {
        self.shipping_fee
    }

    pub fn product_weight(&self) -> Option<Decimal> {
        self.product_weight
    }

    pub fn quotations(&self) -> &[Quotation] {
        &self.quotations
    }

    pub fn quotation(&self, kind: QuotationKind) -> Option<&Quotation> {
        Quotation::find(&self.quotations, kind)
    }

    pub fn status(&self) -> InquiryStatus {
        self.status
    }

    pub fn buyer_quotation_status(&self) -> BuyerQuotationStatus {
        self.buyer_quotation_status
    }

    pub fn quotation_at(&self) -> Option<DateTime<Utc>> {
        self.quotation_at
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn edit_timeout(&self) -> Option<DateTime<Utc>> {
        self.edit_timeout
    }

    pub fn assignee_ids(&self) -> &[UserId] {
        &self.assignee_ids
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_assigned(&self, user_id: UserId) -> bool {
        self.assignee_ids.contains(&user_id)
    }
}

impl AggregateRoot for Inquiry {
    type Id = InquiryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInquiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInquiry {
    pub inquiry_id: InquiryId,
    pub reference_id: String,
    pub buyer_id: UserId,
    pub title: String,
    pub specification: Value,
    pub currency: Currency,
    pub quantity: Option<i64>,
    pub attachments: Vec<Attachment>,
    /// Defaults to creation time plus [`DEFAULT_EDIT_WINDOW_HOURS`].
    pub edit_timeout: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitQuotation (admin sends prices to the buyer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitQuotation {
    pub admin_id: UserId,
    pub quotations: Vec<Quotation>,
    pub shipping_fee: Decimal,
    pub tax_percentage: Decimal,
    pub product_weight: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InquiryCommand {
    Create(CreateInquiry),
    SubmitQuotation(SubmitQuotation),
    ApproveQuotation {
        approver_id: UserId,
        occurred_at: DateTime<Utc>,
    },
    RejectQuotation {
        rejector_id: UserId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Close {
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Cancel {
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    UpdateAttachments {
        actor: Actor,
        attachments: Vec<Attachment>,
        occurred_at: DateTime<Utc>,
    },
    UpdateEditTimeout {
        edit_timeout: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    },
    AssignPic {
        assignee_ids: Vec<UserId>,
        occurred_at: DateTime<Utc>,
    },
    /// The sample order was settled.
    MarkFinished {
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InquiryEvent {
    Created {
        inquiry_id: InquiryId,
        reference_id: String,
        buyer_id: UserId,
        title: String,
        specification: Value,
        currency: Currency,
        quantity: Option<i64>,
        attachments: Vec<Attachment>,
        edit_timeout: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    },
    QuotationSubmitted {
        admin_id: UserId,
        quotations: Vec<Quotation>,
        shipping_fee: Decimal,
        tax_percentage: Decimal,
        product_weight: Option<Decimal>,
        status_before: InquiryStatus,
        buyer_status_before: BuyerQuotationStatus,
        assignee_ids: Vec<UserId>,
        occurred_at: DateTime<Utc>,
    },
    QuotationApproved {
        approver_id: UserId,
        occurred_at: DateTime<Utc>,
    },
    QuotationRejected {
        rejector_id: UserId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Closed {
        status_before: InquiryStatus,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Canceled {
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    AttachmentsUpdated {
        before: Vec<Attachment>,
        after: Vec<Attachment>,
        occurred_at: DateTime<Utc>,
    },
    EditTimeoutUpdated {
        before: Option<DateTime<Utc>>,
        after: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    },
    PicAssigned {
        before: Vec<UserId>,
        after: Vec<UserId>,
        occurred_at: DateTime<Utc>,
    },
    Finished {
        status_before: InquiryStatus,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for InquiryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InquiryEvent::Created { .. } => "inquiry.created",
            InquiryEvent::QuotationSubmitted { .. } => "inquiry.quotation_submitted",
            InquiryEvent::QuotationApproved { .. } => "inquiry.quotation_approved",
            InquiryEvent::QuotationRejected { .. } => "inquiry.quotation_rejected",
            InquiryEvent::Closed { .. } => "inquiry.closed",
            InquiryEvent::Canceled { .. } => "inquiry.canceled",
            InquiryEvent::AttachmentsUpdated { .. } => "inquiry.attachments_updated",
            InquiryEvent::EditTimeoutUpdated { .. } => "inquiry.edit_timeout_updated",
            InquiryEvent::PicAssigned { .. } => "inquiry.pic_assigned",
            InquiryEvent::Finished { .. } => "inquiry.finished",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InquiryEvent::Created { occurred_at, .. }
            | InquiryEvent::QuotationSubmitted { occurred_at, .. }
            | InquiryEvent::QuotationApproved { occurred_at, .. }
            | InquiryEvent::QuotationRejected { occurred_at, .. }
            | InquiryEvent::Closed { occurred_at, .. }
            | InquiryEvent::Canceled { occurred_at, .. }
            | InquiryEvent::AttachmentsUpdated { occurred_at, .. }
            | InquiryEvent::EditTimeoutUpdated { occurred_at, .. }
            | InquiryEvent::PicAssigned { occurred_at, .. }
            | InquiryEvent::Finished { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Auditable for InquiryEvent {
    fn audit_entry(&self) -> Option<AuditEntry> {
        let entry = match self {
            InquiryEvent::Created { reference_id, title, .. } => {
                AuditEntry::new(AuditAction::InquiryCreated, format!("Inquiry {reference_id} created"))
                    .with("title", title)
                    .with("status", InquiryStatus::New)
            }
            InquiryEvent::QuotationSubmitted {
                quotations,
                status_before,
                buyer_status_before,
                shipping_fee,
                tax_percentage,
                ..
            } => AuditEntry::new(
                AuditAction::InquiryAdminSendBuyerQuotation,
                "Quotation sent to buyer",
            )
            .change("status", status_before, InquiryStatus::QuoteInProcess)
            .change(
                "buyer_quotation_status",
                buyer_status_before,
                BuyerQuotationStatus::WaitingForApproval,
            )
            .with("quotations", quotations)
            .with("shipping_fee", shipping_fee)
            .with("tax_percentage", tax_percentage),
            InquiryEvent::QuotationApproved { .. } => AuditEntry::new(
                AuditAction::InquiryBuyerApproveQuotation,
                "Buyer approved the quotation",
            )
            .change(
                "buyer_quotation_status",
                BuyerQuotationStatus::WaitingForApproval,
                BuyerQuotationStatus::Approved,
            ),
            InquiryEvent::QuotationRejected { reason, .. } => AuditEntry::new(
                AuditAction::InquiryBuyerRejectQuotation,
                "Buyer rejected the quotation",
            )
            .change(
                "buyer_quotation_status",
                BuyerQuotationStatus::WaitingForApproval,
                BuyerQuotationStatus::Rejected,
            )
            .with("reject_reason", reason),
            InquiryEvent::Closed { status_before, reason, .. } => {
                AuditEntry::new(AuditAction::InquiryClosed, "Inquiry closed")
                    .change("status", status_before, InquiryStatus::Closed)
                    .with("reason", reason)
            }
            InquiryEvent::Canceled { reason, .. } => {
                AuditEntry::new(AuditAction::InquiryCanceled, "Inquiry canceled")
                    .change("status", InquiryStatus::New, InquiryStatus::Canceled)
                    .with("reason", reason)
            }
            InquiryEvent::AttachmentsUpdated { before, after, .. } => {
                AuditEntry::new(AuditAction::InquiryEdited, "Inquiry attachments updated")
                    .change("attachments", before, after)
            }
            InquiryEvent::EditTimeoutUpdated { before, after, .. } => AuditEntry::new(
                AuditAction::InquiryEditTimeoutUpdated,
                "Edit timeout updated",
            )
            .change("edit_timeout", before, after),
            InquiryEvent::PicAssigned { before, after, .. } => {
                AuditEntry::new(AuditAction::InquiryAssignPic, "Assignees updated")
                    .change("assignee_ids", before, after)
            }
            InquiryEvent::Finished { status_before, .. } => {
                AuditEntry::new(AuditAction::InquiryFinished, "Sample order settled")
                    .change("status", status_before, InquiryStatus::Finished)
            }
        };
        Some(entry)
    }
}

impl Aggregate for Inquiry {
    type Command = InquiryCommand;
    type Event = InquiryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InquiryEvent::Created {
                inquiry_id,
                reference_id,
                buyer_id,
                title,
                specification,
                currency,
                quantity,
                attachments,
                edit_timeout,
                occurred_at,
            } => {
                self.id = *inquiry_id;
                self.reference_id = reference_id.clone();
                self.buyer_id = Some(*buyer_id);
                self.title = title.clone();
                self.specification = specification.clone();
                self.currency = *currency;
                self.quantity = *quantity;
                self.attachments = attachments.clone();
                self.edit_timeout = Some(*edit_timeout);
                self.status = InquiryStatus::New;
                self.buyer_quotation_status = BuyerQuotationStatus::New;
                self.created_at = Some(*occurred_at);
                self.created = true;
            }
            InquiryEvent::QuotationSubmitted {
                quotations,
                shipping_fee,
                tax_percentage,
                product_weight,
                assignee_ids,
                occurred_at,
                ..
            } => {
                self.quotations = quotations.clone();
                self.shipping_fee = *shipping_fee;
                self.tax_percentage = *tax_percentage;
                self.product_weight = *product_weight;
                self.assignee_ids = assignee_ids.clone();
                self.status = InquiryStatus::QuoteInProcess;
                self.buyer_quotation_status = BuyerQuotationStatus::WaitingForApproval;
                self.quotation_at = Some(*occurred_at);
            }
            InquiryEvent::QuotationApproved { occurred_at, .. } => {
                self.buyer_quotation_status = BuyerQuotationStatus::Approved;
                self.approved_at = Some(*occurred_at);
                for q in self.quotations.iter_mut().filter(|q| q.kind == QuotationKind::Sample) {
                    q.accepted = true;
                }
            }
            InquiryEvent::QuotationRejected { reason, occurred_at, .. } => {
                self.buyer_quotation_status = BuyerQuotationStatus::Rejected;
                self.rejected_at = Some(*occurred_at);
                self.rejection_reason = Some(reason.clone());
            }
            InquiryEvent::Closed { reason, occurred_at, .. } => {
                self.status = InquiryStatus::Closed;
                self.close_reason = reason.clone();
                self.deleted_at = Some(*occurred_at);
            }
            InquiryEvent::Canceled { reason, occurred_at } => {
                self.status = InquiryStatus::Canceled;
                self.close_reason = reason.clone();
                self.deleted_at = Some(*occurred_at);
            }
            InquiryEvent::AttachmentsUpdated { after, .. } => {
                self.attachments = after.clone();
            }
            InquiryEvent::EditTimeoutUpdated { after, .. } => {
                self.edit_timeout = Some(*after);
            }
            InquiryEvent::PicAssigned { after, .. } => {
                self.assignee_ids = after.clone();
            }
            InquiryEvent::Finished { .. } => {
                self.status = InquiryStatus::Finished;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let creating = matches!(command, InquiryCommand::Create(_));
        if !creating && (!self.created || self.is_deleted()) {
            return Err(DomainError::not_found());
        }

        match command {
            InquiryCommand::Create(cmd) => self.handle_create(cmd),
            InquiryCommand::SubmitQuotation(cmd) => self.handle_submit_quotation(cmd),
            InquiryCommand::ApproveQuotation {
                approver_id,
                occurred_at,
            } => self.handle_approve(*approver_id, *occurred_at),
            InquiryCommand::RejectQuotation {
                rejector_id,
                reason,
                occurred_at,
            } => self.handle_reject(*rejector_id, reason, *occurred_at),
            InquiryCommand::Close { reason, occurred_at } => self.handle_close(reason, *occurred_at),
            InquiryCommand::Cancel { reason, occurred_at } => {
                self.handle_cancel(reason, *occurred_at)
            }
            InquiryCommand::UpdateAttachments {
                actor,
                attachments,
                occurred_at,
            } => self.handle_update_attachments(actor, attachments, *occurred_at),
            InquiryCommand::UpdateEditTimeout {
                edit_timeout,
                occurred_at,
            } => Ok(vec![InquiryEvent::EditTimeoutUpdated {
                before: self.edit_timeout,
                after: *edit_timeout,
                occurred_at: *occurred_at,
            }]),
            InquiryCommand::AssignPic {
                assignee_ids,
                occurred_at,
            } => self.handle_assign_pic(assignee_ids, *occurred_at),
            InquiryCommand::MarkFinished { occurred_at } => self.handle_finish(*occurred_at),
        }
    }
}

impl Inquiry {
    fn handle_create(&self, cmd: &CreateInquiry) -> Result<Vec<InquiryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("inquiry already exists"));
        }
        if cmd.title.trim().is_empty() {
            return Err(DomainError::validation("title is required"));
        }
        if matches!(cmd.quantity, Some(q) if q <= 0) {
            return Err(DomainError::validation("quantity must be positive"));
        }

        Ok(vec![InquiryEvent::Created {
            inquiry_id: cmd.inquiry_id,
            reference_id: cmd.reference_id.clone(),
            buyer_id: cmd.buyer_id,
            title: cmd.title.clone(),
            specification: cmd.specification.clone(),
            currency: cmd.currency,
            quantity: cmd.quantity,
            attachments: cmd.attachments.clone(),
            edit_timeout: cmd
                .edit_timeout
                .unwrap_or(cmd.occurred_at + Duration::hours(DEFAULT_EDIT_WINDOW_HOURS)),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_submit_quotation(&self, cmd: &SubmitQuotation) -> Result<Vec<InquiryEvent>, DomainError> {
        self.buyer_quotation_status.transition(BuyerQuotationTrigger::Quote)?;
        self.status.transition(InquiryTrigger::SubmitQuotation)?;

        if cmd.quotations.is_empty() {
            return Err(DomainError::validation("at least one quotation is required"));
        }
        if cmd.quotations.iter().any(|q| q.price < Decimal::ZERO) {
            return Err(DomainError::validation("quoted price cannot be negative"));
        }
        if cmd.shipping_fee < Decimal::ZERO || cmd.tax_percentage < Decimal::ZERO {
            return Err(DomainError::validation("shipping fee and tax cannot be negative"));
        }

        let mut assignee_ids = self.assignee_ids.clone();
        if !assignee_ids.contains(&cmd.admin_id) {
            assignee_ids.push(cmd.admin_id);
        }

        Ok(vec![InquiryEvent::QuotationSubmitted {
            admin_id: cmd.admin_id,
            quotations: cmd.quotations.clone(),
            shipping_fee: cmd.shipping_fee,
            tax_percentage: cmd.tax_percentage,
            product_weight: cmd.product_weight,
            status_before: self.status,
            buyer_status_before: self.buyer_quotation_status,
            assignee_ids,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_approve(
        &self,
        approver_id: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InquiryEvent>, DomainError> {
        self.buyer_quotation_status.transition(BuyerQuotationTrigger::Approve)?;
        if self.quotation(QuotationKind::Sample).is_none() {
            return Err(DomainError::invalid_state("no sample quotation to approve"));
        }
        Ok(vec![InquiryEvent::QuotationApproved {
            approver_id,
            occurred_at,
        }])
    }

    fn handle_reject(
        &self,
        rejector_id: UserId,
        reason: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InquiryEvent>, DomainError> {
        self.buyer_quotation_status.transition(BuyerQuotationTrigger::Reject)?;
        Ok(vec![InquiryEvent::QuotationRejected {
            rejector_id,
            reason: reason.to_string(),
            occurred_at,
        }])
    }

    // Close and cancel report a guard miss as NotFound: zero rows matched.
    fn handle_close(
        &self,
        reason: &Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InquiryEvent>, DomainError> {
        if !self.status.can(InquiryTrigger::Close) {
            return Err(DomainError::not_found());
        }
        Ok(vec![InquiryEvent::Closed {
            status_before: self.status,
            reason: reason.clone(),
            occurred_at,
        }])
    }

    fn handle_cancel(
        &self,
        reason: &Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InquiryEvent>, DomainError> {
        if !self.status.can(InquiryTrigger::Cancel) {
            return Err(DomainError::not_found());
        }
        Ok(vec![InquiryEvent::Canceled {
            reason: reason.clone(),
            occurred_at,
        }])
    }

    fn handle_update_attachments(
        &self,
        actor: &Actor,
        attachments: &[Attachment],
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InquiryEvent>, DomainError> {
        if !actor.is_admin() {
            if self.buyer_id != Some(actor.id) {
                return Err(DomainError::not_found());
            }
            if matches!(self.edit_timeout, Some(deadline) if occurred_at > deadline) {
                return Err(DomainError::EditTimeoutExpired);
            }
        }
        if self.attachments == attachments {
            return Ok(vec![]);
        }
        Ok(vec![InquiryEvent::AttachmentsUpdated {
            before: self.attachments.clone(),
            after: attachments.to_vec(),
            occurred_at,
        }])
    }

    fn handle_assign_pic(
        &self,
        assignee_ids: &[UserId],
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InquiryEvent>, DomainError> {
        let mut after = Vec::with_capacity(assignee_ids.len());
        for id in assignee_ids {
            if !after.contains(id) {
                after.push(*id);
            }
        }
        if after == self.assignee_ids {
            return Ok(vec![]);
        }
        Ok(vec![InquiryEvent::PicAssigned {
            before: self.assignee_ids.clone(),
            after,
            occurred_at,
        }])
    }

    fn handle_finish(&self, occurred_at: DateTime<Utc>) -> Result<Vec<InquiryEvent>, DomainError> {
        if self.status == InquiryStatus::Finished {
            return Ok(vec![]);
        }
        self.status.transition(InquiryTrigger::Finish)?;
        Ok(vec![InquiryEvent::Finished {
            status_before: self.status,
            occurred_at,
        }])
    }
}
