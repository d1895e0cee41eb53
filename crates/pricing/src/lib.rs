//! `inflow-pricing`: deterministic order pricing.
//!
//! Computes subtotal, tax, shipping, transaction fee and the per-milestone
//! split for sample and bulk orders. No IO; every stored price on an order is
//! a cache of what this crate returns.

pub mod cart;
pub mod engine;
pub mod fees;
pub mod milestone;
pub mod quotation;

pub use cart::{AdditionalItem, CartItem, CommercialInvoice};
pub use engine::{
    BulkPricing, BulkPricingInput, MilestoneAmounts, PricingEngine, PricingSnapshot,
    SamplePricingInput,
};
pub use fees::FeeSchedule;
pub use milestone::{Milestone, MilestonePaymentTypes, MilestonePlan, PaymentType};
pub use quotation::{Quotation, QuotationKind};
