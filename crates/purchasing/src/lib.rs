//! Sample purchase orders.
//!
//! Checkout, settlement and production tracking for the single paid sample
//! that precedes a bulk order. Pure domain logic: pricing arrives as a
//! computed snapshot and gateway outcomes arrive as commands.

pub mod lead_time;
pub mod order;
pub mod status;

pub use lead_time::LeadTime;
pub use order::{
    CreatePurchaseOrder, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderEvent,
};
pub use status::{PaymentStatus, PaymentTrigger, PoTrackingStatus, PoTrackingTrigger};
