//! Payment transactions: one row per payment attempt or confirmation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use inflow_core::{
    AggregateRoot, Attachment, BulkPurchaseOrderId, Currency, DomainError, DomainResult,
    InquiryId, PaymentTransactionId, PurchaseOrderId, UserId,
};
use inflow_pricing::{Milestone, PaymentType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    WaitingConfirm,
    Paid,
    Unpaid,
}

/// The order family a transaction pays for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub inquiry_id: InquiryId,
    pub purchase_order_id: PurchaseOrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_purchase_order_id: Option<BulkPurchaseOrderId>,
}

impl OrderRef {
    pub fn sample(inquiry_id: InquiryId, purchase_order_id: PurchaseOrderId) -> Self {
        Self {
            inquiry_id,
            purchase_order_id,
            bulk_purchase_order_id: None,
        }
    }

    pub fn bulk(
        inquiry_id: InquiryId,
        purchase_order_id: PurchaseOrderId,
        bulk_purchase_order_id: BulkPurchaseOrderId,
    ) -> Self {
        Self {
            inquiry_id,
            purchase_order_id,
            bulk_purchase_order_id: Some(bulk_purchase_order_id),
        }
    }
}

/// Input for recording a transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub reference_id: String,
    pub order: OrderRef,
    pub payer_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    pub milestone: Milestone,
    pub payment_percentage: u32,
    pub payment_type: PaymentType,
    pub status: TransactionStatus,
    pub transaction_ref_id: Option<String>,
    pub attachments: Vec<Attachment>,
    pub payment_intent_id: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: PaymentTransactionId,
    pub reference_id: String,
    pub order: OrderRef,
    pub payer_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    pub milestone: Milestone,
    pub payment_percentage: u32,
    pub payment_type: PaymentType,
    pub status: TransactionStatus,
    pub transaction_ref_id: Option<String>,
    pub attachments: Vec<Attachment>,
    pub payment_intent_id: Option<String>,
    pub note: Option<String>,
    pub mark_as_paid_at: Option<DateTime<Utc>>,
    pub mark_as_unpaid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl PaymentTransaction {
    pub fn record(new: NewTransaction) -> Self {
        let mark_as_paid_at = (new.status == TransactionStatus::Paid).then_some(new.created_at);
        Self {
            id: PaymentTransactionId::new(),
            reference_id: new.reference_id,
            order: new.order,
            payer_id: new.payer_id,
            amount: new.amount,
            currency: new.currency,
            milestone: new.milestone,
            payment_percentage: new.payment_percentage,
            payment_type: new.payment_type,
            status: new.status,
            transaction_ref_id: new.transaction_ref_id,
            attachments: new.attachments,
            payment_intent_id: new.payment_intent_id,
            note: new.note,
            mark_as_paid_at,
            mark_as_unpaid_at: None,
            created_at: new.created_at,
            version: 1,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::WaitingConfirm
    }

    /// Settles a pending transaction.
    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            TransactionStatus::Paid => Err(DomainError::already_paid(format!(
                "transaction {} is already paid",
                self.reference_id
            ))),
            TransactionStatus::WaitingConfirm | TransactionStatus::Unpaid => {
                self.status = TransactionStatus::Paid;
                self.mark_as_paid_at = Some(at);
                self.version += 1;
                Ok(())
            }
        }
    }

    /// Rejects a pending transaction (transfer never arrived).
    pub fn mark_unpaid(&mut self, at: DateTime<Utc>, note: Option<String>) -> DomainResult<()> {
        match self.status {
            TransactionStatus::Paid => Err(DomainError::already_paid(format!(
                "transaction {} is already paid",
                self.reference_id
            ))),
            TransactionStatus::Unpaid => Err(DomainError::invalid_state(format!(
                "transaction {} is already unpaid",
                self.reference_id
            ))),
            TransactionStatus::WaitingConfirm => {
                self.status = TransactionStatus::Unpaid;
                self.mark_as_unpaid_at = Some(at);
                if note.is_some() {
                    self.note = note;
                }
                self.version += 1;
                Ok(())
            }
        }
    }
}

impl AggregateRoot for PaymentTransaction {
    type Id = PaymentTransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn test_transaction(status: TransactionStatus) -> PaymentTransaction {
        PaymentTransaction::record(NewTransaction {
            reference_id: "PT-TEST01".into(),
            order: OrderRef::sample(InquiryId::new(), PurchaseOrderId::new()),
            payer_id: UserId::new(),
            amount: dec!(120.50),
            currency: Currency::Usd,
            milestone: Milestone::Final,
            payment_percentage: 100,
            payment_type: PaymentType::BankTransfer,
            status,
            transaction_ref_id: Some("TX1".into()),
            attachments: vec![],
            payment_intent_id: None,
            note: None,
            created_at: test_time(),
        })
    }

    #[test]
    fn paid_on_creation_stamps_mark_as_paid() {
        let tx = test_transaction(TransactionStatus::Paid);
        assert_eq!(tx.mark_as_paid_at, Some(test_time()));
        assert!(!tx.is_pending());
    }

    #[test]
    fn mark_paid_is_guarded() {
        let mut tx = test_transaction(TransactionStatus::WaitingConfirm);
        tx.mark_paid(test_time()).unwrap();
        assert_eq!(tx.status, TransactionStatus::Paid);
        assert_eq!(tx.version, 2);

        match tx.mark_paid(test_time()) {
            Err(DomainError::AlreadyPaid(_)) => {}
            other => panic!("Expected AlreadyPaid, got {other:?}"),
        }
    }

    #[test]
    fn mark_unpaid_keeps_existing_note_when_none_given() {
        let mut tx = test_transaction(TransactionStatus::WaitingConfirm);
        tx.note = Some("first".into());
        tx.mark_unpaid(test_time(), None).unwrap();
        assert_eq!(tx.status, TransactionStatus::Unpaid);
        assert_eq!(tx.note.as_deref(), Some("first"));
        assert!(tx.mark_unpaid(test_time(), None).is_err());
    }
}
