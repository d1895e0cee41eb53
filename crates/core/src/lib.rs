//! `inflow-core`: domain building blocks shared by every lifecycle crate.
//!
//! Pure domain primitives only: identifiers, the error model, aggregate and
//! state-machine contracts, money and audit value types. No IO lives here.

pub mod actor;
pub mod aggregate;
pub mod audit;
pub mod error;
pub mod event;
pub mod fsm;
pub mod id;
pub mod money;
pub mod value_object;

pub use actor::{Actor, ActorRole};
pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use audit::{AuditAction, AuditEntry, Auditable};
pub use error::{DomainError, DomainResult, InvalidPricingInput};
pub use event::Event;
pub use fsm::StateMachine;
pub use id::{
    AuditRecordId, BulkPurchaseOrderId, CartItemId, ChecklistItemId, InquiryId,
    PaymentTransactionId, PurchaseOrderId, UserId,
};
pub use money::{Currency, round_money};
pub use value_object::{Attachment, ValueObject};
