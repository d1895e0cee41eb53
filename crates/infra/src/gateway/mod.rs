//! Payment gateway adapters.
//!
//! [`StripeGateway`] talks to the real provider over HTTP. [`ScriptedGateway`]
//! answers from a queue of canned outcomes and backs tests and local runs.

mod scripted;
mod stripe;

pub use scripted::{ScriptedGateway, ScriptedOutcome};
pub use stripe::{StripeConfig, StripeGateway};
