//! Fixtures shared by the service tests.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use inflow_core::{Actor, Currency, InquiryId, PurchaseOrderId, UserId};
use inflow_pricing::{PaymentType, Quotation, QuotationKind};

use crate::config::EngineConfig;
use crate::gateway::ScriptedGateway;

use super::{Backends, Engine, LineInput, NewInquiry, QuotationInput, SampleCheckout};

pub(crate) struct SampleFixture {
    pub admin: Actor,
    pub buyer: Actor,
    pub inquiry_id: InquiryId,
    pub order_id: PurchaseOrderId,
}

pub(crate) fn test_engine() -> (Engine, Arc<ScriptedGateway>) {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = Engine::new(EngineConfig::default(), Backends::in_memory(gateway.clone()));
    (engine, gateway)
}

/// Inquiry with a quoted sample of two pieces at 20 each, no tax or shipping.
pub(crate) async fn quoted_sample(engine: &Engine) -> SampleFixture {
    let admin = Actor::admin(UserId::new());
    let buyer = Actor::buyer(UserId::new());

    let created = engine
        .inquiries
        .create(
            &buyer,
            NewInquiry {
                title: "Hoodie sample".into(),
                specification: json!({ "fabric": "fleece" }),
                currency: Currency::Usd,
                quantity: Some(500),
                attachments: vec![],
                edit_timeout: None,
                sample_items: vec![LineInput {
                    size: "M".into(),
                    color: "black".into(),
                    qty: 2,
                    unit_price: Decimal::ZERO,
                    note: None,
                }],
            },
        )
        .await
        .unwrap();
    let inquiry_id = created.inquiry.id_typed();

    engine
        .inquiries
        .submit_quotation(
            &admin,
            inquiry_id,
            QuotationInput {
                quotations: vec![
                    Quotation {
                        kind: QuotationKind::Sample,
                        price: dec!(20),
                        lead_time_days: 7,
                        accepted: false,
                    },
                    Quotation {
                        kind: QuotationKind::Bulk,
                        price: dec!(12),
                        lead_time_days: 30,
                        accepted: false,
                    },
                ],
                shipping_fee: Decimal::ZERO,
                tax_percentage: Decimal::ZERO,
                product_weight: None,
            },
        )
        .await
        .unwrap();

    SampleFixture {
        admin,
        buyer,
        inquiry_id,
        order_id: created.sample_order.id_typed(),
    }
}

/// [`quoted_sample`] paid by bank transfer and confirmed by the admin.
pub(crate) async fn paid_sample(engine: &Engine) -> SampleFixture {
    let fixture = quoted_sample(engine).await;
    engine
        .samples
        .checkout(
            &fixture.buyer,
            fixture.order_id,
            SampleCheckout {
                payment_type: PaymentType::BankTransfer,
                transaction_ref_id: Some("TRF-1".into()),
                ..SampleCheckout::default()
            },
        )
        .await
        .unwrap();
    engine
        .samples
        .mark_as_paid(&fixture.admin, fixture.order_id, None)
        .await
        .unwrap();
    fixture
}
