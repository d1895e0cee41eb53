//! `inflow-payments`: payment records and the payment-gateway port.

pub mod gateway;
pub mod transaction;

pub use gateway::{
    GatewayError, IntentRequest, IntentStatus, LinkLineItem, LinkRequest, PaymentGateway,
    PaymentIntent, PaymentLink,
};
pub use transaction::{NewTransaction, OrderRef, PaymentTransaction, TransactionStatus};
