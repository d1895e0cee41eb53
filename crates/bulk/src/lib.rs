//! Bulk purchase orders.
//!
//! The full production order derived from a paid sample: quotation, up to
//! three payment milestones plus deposits, production checklists, QC,
//! delivery, and the seller-side tracking lane.

pub mod checklist;
pub mod order;
pub mod route;
pub mod seller;
pub mod tracking;

pub use checklist::{ChecklistItem, ChecklistKind, ChecklistStatus, QcReport, QcStatus};
pub use order::{
    BulkPurchaseOrder, BulkPurchaseOrderCommand, BulkPurchaseOrderEvent, CreateBulkPurchaseOrder,
    FinalPaymentTerms, MilestoneState, SellerQuotation, SendQuotation,
};
pub use route::{PaymentRoute, payment_route};
pub use seller::{SellerRef, SellerTrackingStatus, SellerTrigger};
pub use tracking::{BulkTrackingStatus, BulkTrackingTrigger, MilestoneStages, milestone_stages};
