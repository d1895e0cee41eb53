//! Inquiry (RFQ) domain module.
//!
//! An inquiry carries the buyer's request and the admin quotations. It runs two
//! coupled state machines: the inquiry status and the buyer's view of the
//! current quotation.

pub mod inquiry;
pub mod status;

pub use inquiry::{CreateInquiry, Inquiry, InquiryCommand, InquiryEvent, SubmitQuotation};
pub use status::{BuyerQuotationStatus, BuyerQuotationTrigger, InquiryStatus, InquiryTrigger};
