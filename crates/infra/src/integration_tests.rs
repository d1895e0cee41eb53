//! End-to-end lifecycle runs on the in-memory backends.
//!
//! Inquiry -> sample order -> payment -> bulk order -> milestones -> delivery,
//! plus the concurrency and gateway round-trip cases.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use inflow_bulk::{BulkTrackingStatus, ChecklistKind, ChecklistStatus, FinalPaymentTerms, QcStatus};
use inflow_core::{AuditAction, Currency};
use inflow_inquiry::InquiryStatus;
use inflow_payments::{IntentStatus, TransactionStatus};
use inflow_pricing::{Milestone, PaymentType, Quotation, QuotationKind};
use inflow_purchasing::PaymentStatus;

use crate::audit::AuditSubject;
use crate::config::EngineConfig;
use crate::error::LifecycleError;
use crate::gateway::{ScriptedGateway, ScriptedOutcome};
use crate::services::testing::{SampleFixture, paid_sample, quoted_sample};
use crate::services::{
    Backends, BulkCheckout, BulkQuotationInput, CallbackOutcome, ChecklistInput, CheckoutOutcome,
    Engine, LineInput, QcInput, SampleCheckout,
};
use inflow_core::BulkPurchaseOrderId;

/// Short lock timeouts so a leaked lock fails fast instead of hanging.
fn fast_engine() -> (Engine, Arc<ScriptedGateway>) {
    let gateway = Arc::new(ScriptedGateway::new());
    let config = EngineConfig {
        preview_lock_timeout: Duration::from_millis(200),
        payment_lock_timeout: Duration::from_millis(200),
        ..EngineConfig::default()
    };
    (Engine::new(config, Backends::in_memory(gateway.clone())), gateway)
}

fn bulk_quotation(first: u32, second: u32) -> BulkQuotationInput {
    BulkQuotationInput {
        quotations: vec![Quotation {
            kind: QuotationKind::Bulk,
            price: dec!(15),
            lead_time_days: 45,
            accepted: false,
        }],
        first_percentage: first,
        second_percentage: second,
        tax_percentage: dec!(8),
        shipping_fee: dec!(40),
    }
}

async fn quoted_bulk(engine: &Engine, fixture: &SampleFixture, first: u32, second: u32) -> BulkPurchaseOrderId {
    let bulk = engine
        .samples
        .create_bulk_order(&fixture.buyer, fixture.order_id, None)
        .await
        .unwrap();
    let id = bulk.id_typed();
    engine.bulk.submit_order(&fixture.buyer, id, None).await.unwrap();
    engine
        .bulk
        .send_quotation(&fixture.admin, id, bulk_quotation(first, second))
        .await
        .unwrap();
    id
}

fn bank_transfer(reference: &str) -> BulkCheckout {
    BulkCheckout {
        payment_type: PaymentType::BankTransfer,
        transaction_ref_id: Some(reference.into()),
        ..BulkCheckout::default()
    }
}

#[tokio::test]
async fn sample_card_payment_with_three_ds_completes_through_the_callback() {
    let (engine, gateway) = fast_engine();
    let fixture = quoted_sample(&engine).await;
    gateway.push(ScriptedOutcome::RequireAction(json!({ "type": "redirect_to_url" })));

    let outcome = engine
        .samples
        .checkout(
            &fixture.buyer,
            fixture.order_id,
            SampleCheckout {
                payment_type: PaymentType::Card,
                payment_method_id: Some("pm_card_visa".into()),
                ..SampleCheckout::default()
            },
        )
        .await
        .unwrap();
    let intent_id = match outcome {
        CheckoutOutcome::RequiresAction {
            payment_intent_id,
            next_action,
        } => {
            assert!(next_action.is_some());
            payment_intent_id
        }
        other => panic!("Expected RequiresAction, got {other:?}"),
    };

    // The payment lock is free again while the buyer is away at the bank.
    engine
        .samples
        .preview_checkout(&fixture.buyer, fixture.order_id, PaymentType::Card)
        .await
        .unwrap();

    match engine.samples.confirm_payment_callback(fixture.order_id).await.unwrap() {
        CallbackOutcome::Unsettled { status } => assert_eq!(status, IntentStatus::RequiresAction),
        other => panic!("Expected Unsettled, got {other:?}"),
    }

    gateway.settle_out_of_band(&intent_id, IntentStatus::Succeeded);
    match engine.samples.confirm_payment_callback(fixture.order_id).await.unwrap() {
        CallbackOutcome::Paid {
            transaction: Some(transaction),
        } => {
            assert_eq!(transaction.status, TransactionStatus::Paid);
            assert_eq!(transaction.payment_type, PaymentType::Card);
            assert_eq!(transaction.payment_intent_id.as_deref(), Some(intent_id.as_str()));
        }
        other => panic!("Expected Paid with a transaction, got {other:?}"),
    }

    // A repeated callback does not pay twice.
    assert_eq!(
        engine.samples.confirm_payment_callback(fixture.order_id).await.unwrap(),
        CallbackOutcome::Paid { transaction: None }
    );
    let history = engine
        .samples
        .transactions(&fixture.admin, fixture.order_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    let inquiry = engine.inquiries.get(&fixture.admin, fixture.inquiry_id).await.unwrap();
    assert_eq!(inquiry.status(), InquiryStatus::Finished);
}

#[tokio::test]
async fn concurrent_mark_as_paid_settles_once() {
    let (engine, _) = fast_engine();
    let fixture = quoted_sample(&engine).await;
    engine
        .samples
        .checkout(
            &fixture.buyer,
            fixture.order_id,
            SampleCheckout {
                payment_type: PaymentType::BankTransfer,
                ..SampleCheckout::default()
            },
        )
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        engine.samples.mark_as_paid(&fixture.admin, fixture.order_id, None),
        engine.samples.mark_as_paid(&fixture.admin, fixture.order_id, None),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(LifecycleError::AlreadyPaid(_))))
    );

    let order = engine.samples.get(&fixture.admin, fixture.order_id).await.unwrap();
    assert_eq!(order.status(), PaymentStatus::Paid);
    let history = engine
        .samples
        .transactions(&fixture.admin, fixture.order_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransactionStatus::Paid);
}

#[tokio::test]
async fn zero_percent_first_payment_goes_straight_to_production() {
    let (engine, _) = fast_engine();
    let fixture = paid_sample(&engine).await;
    let id = quoted_bulk(&engine, &fixture, 0, 0).await;

    let order = engine.bulk.get(&fixture.buyer, id).await.unwrap();
    assert_eq!(order.tracking_status(), BulkTrackingStatus::FirstPaymentConfirmed);
    assert!(order.is_settled(Milestone::First));
    assert!(order.production_gate_open());
    let pricing = order.pricing().unwrap();
    assert_eq!(pricing.amount_due(Milestone::First), Decimal::ZERO);
    assert_eq!(pricing.amount_due(Milestone::Final), pricing.total);

    match engine
        .bulk
        .checkout(&fixture.buyer, id, Milestone::First, bank_transfer("TRF-1"))
        .await
    {
        Err(LifecycleError::AlreadyPaid(_)) => {}
        other => panic!("Expected AlreadyPaid, got {other:?}"),
    }
}

#[tokio::test]
async fn bank_transfer_final_payment_through_delivery() {
    let (engine, _) = fast_engine();
    let fixture = paid_sample(&engine).await;
    let id = quoted_bulk(&engine, &fixture, 0, 0).await;
    let admin = &fixture.admin;

    engine
        .bulk
        .upsert_checklist(
            admin,
            id,
            ChecklistKind::Production,
            ChecklistInput {
                id: None,
                name: "Cutting".into(),
                description: None,
                status: ChecklistStatus::Approved,
                attachments: vec![],
            },
        )
        .await
        .unwrap();
    engine
        .bulk
        .create_qc_report(
            admin,
            id,
            QcInput {
                status: QcStatus::Passed,
                note: Some("AQL 2.5".into()),
                attachments: vec![],
            },
        )
        .await
        .unwrap();
    engine.bulk.submit_goods(admin, id).await.unwrap();
    let order = engine
        .bulk
        .mark_final_payment(
            admin,
            id,
            FinalPaymentTerms {
                deduct_sample: true,
                ..FinalPaymentTerms::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(order.tracking_status(), BulkTrackingStatus::FinalPayment);
    let due = order.amount_due(Milestone::Final);
    assert_eq!(order.pricing().unwrap().sample_deduction, dec!(40));

    let outcome = engine
        .bulk
        .checkout(&fixture.buyer, id, Milestone::Final, bank_transfer("TRF-FINAL"))
        .await
        .unwrap();
    match outcome {
        CheckoutOutcome::AwaitingConfirmation { transaction } => {
            assert_eq!(transaction.amount, due);
            assert_eq!(transaction.status, TransactionStatus::WaitingConfirm);
            assert_eq!(transaction.milestone, Milestone::Final);
        }
        other => panic!("Expected AwaitingConfirmation, got {other:?}"),
    }
    let order = engine.bulk.get(admin, id).await.unwrap();
    assert_eq!(order.tracking_status(), BulkTrackingStatus::FinalPaymentConfirm);

    let order = engine
        .bulk
        .mark_as_paid(admin, id, Milestone::Final, Some(due))
        .await
        .unwrap();
    assert_eq!(order.tracking_status(), BulkTrackingStatus::FinalPaymentConfirmed);
    let history = engine.bulk.transactions(admin, id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransactionStatus::Paid);

    engine
        .bulk
        .mark_delivering(admin, id, json!({ "carrier": "DHL", "tracking": "1Z999" }))
        .await
        .unwrap();
    engine.bulk.mark_delivered(admin, id).await.unwrap();
    let order = engine.bulk.confirm_delivered(&fixture.buyer, id).await.unwrap();
    assert_eq!(order.tracking_status(), BulkTrackingStatus::DeliveryConfirmed);
    assert!(order.receiver_confirmed_at().is_some());
}

#[tokio::test]
async fn reset_is_refused_once_the_first_payment_is_received() {
    let (engine, _) = fast_engine();
    let fixture = paid_sample(&engine).await;
    let id = quoted_bulk(&engine, &fixture, 30, 0).await;

    engine
        .bulk
        .checkout(&fixture.buyer, id, Milestone::First, bank_transfer("TRF-A"))
        .await
        .unwrap();
    engine
        .bulk
        .mark_as_unpaid(&fixture.admin, id, Milestone::First, Some("wrong account".into()))
        .await
        .unwrap();
    // A rejected transfer never counted as received.
    let order = engine.bulk.reset(&fixture.admin, id).await.unwrap();
    assert_eq!(order.tracking_status(), BulkTrackingStatus::New);

    // Reset drops the lines, so the buyer submits them again.
    let lines = vec![LineInput {
        size: "L".into(),
        color: "navy".into(),
        qty: 300,
        unit_price: Decimal::ZERO,
        note: None,
    }];
    engine.bulk.submit_order(&fixture.buyer, id, Some(lines)).await.unwrap();
    engine
        .bulk
        .send_quotation(&fixture.admin, id, bulk_quotation(30, 0))
        .await
        .unwrap();
    engine
        .bulk
        .checkout(&fixture.buyer, id, Milestone::First, bank_transfer("TRF-B"))
        .await
        .unwrap();
    engine
        .bulk
        .mark_as_paid(&fixture.admin, id, Milestone::First, None)
        .await
        .unwrap();

    match engine.bulk.reset(&fixture.admin, id).await {
        Err(LifecycleError::AlreadyPaid(_)) => {}
        other => panic!("Expected AlreadyPaid, got {other:?}"),
    }
}

#[tokio::test]
async fn milestone_card_payment_records_the_intent_and_settles() {
    let (engine, gateway) = fast_engine();
    let fixture = paid_sample(&engine).await;
    let id = quoted_bulk(&engine, &fixture, 30, 20).await;

    let outcome = engine
        .bulk
        .checkout(
            &fixture.buyer,
            id,
            Milestone::First,
            BulkCheckout {
                payment_type: PaymentType::Card,
                payment_method_id: Some("pm_card_visa".into()),
                ..BulkCheckout::default()
            },
        )
        .await
        .unwrap();
    let transaction = match outcome {
        CheckoutOutcome::Paid { transaction } => transaction,
        other => panic!("Expected Paid, got {other:?}"),
    };
    assert_eq!(transaction.payment_percentage, 30);

    let order = engine.bulk.get(&fixture.buyer, id).await.unwrap();
    assert!(order.is_settled(Milestone::First));
    assert_eq!(order.tracking_status(), BulkTrackingStatus::FirstPaymentConfirmed);
    let first = order.pricing().unwrap().milestone(Milestone::First).unwrap();
    assert_eq!(first.payment_type, PaymentType::Card);
    assert!(first.transaction_fee > Decimal::ZERO);

    let requests = gateway.intent_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].currency, Currency::Usd);
    assert_eq!(requests[0].amount, Currency::Usd.to_smallest_unit(first.total).unwrap());
    assert_eq!(requests[0].metadata.get("milestone").map(String::as_str), Some("first_payment"));

    // Production waits for the planned second payment.
    match engine
        .bulk
        .upsert_checklist(
            &fixture.admin,
            id,
            ChecklistKind::RawMaterial,
            ChecklistInput {
                id: None,
                name: "Fleece".into(),
                description: None,
                status: ChecklistStatus::Pending,
                attachments: vec![],
            },
        )
        .await
    {
        Err(LifecycleError::InvalidState(_)) => {}
        other => panic!("Expected InvalidState, got {other:?}"),
    }
    let order = engine.bulk.request_second_payment(&fixture.admin, id).await.unwrap();
    assert_eq!(order.tracking_status(), BulkTrackingStatus::SecondPayment);
}

#[tokio::test]
async fn every_state_change_leaves_an_audit_record() {
    let (engine, _) = fast_engine();
    let fixture = paid_sample(&engine).await;

    let records = engine
        .audit_history(&fixture.admin, AuditSubject::PurchaseOrder(fixture.order_id))
        .await
        .unwrap();
    assert!(records.len() >= 3);
    assert!(records.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert!(records.iter().any(|r| r.action == AuditAction::InquiryAdminMarkAsPaid));
    assert!(records.iter().all(|r| r.inquiry_id == Some(fixture.inquiry_id)));

    let inquiry_records = engine
        .audit_history(&fixture.admin, AuditSubject::Inquiry(fixture.inquiry_id))
        .await
        .unwrap();
    assert!(inquiry_records.iter().any(|r| r.action == AuditAction::InquiryFinished));

    let annotated = engine
        .annotate_audit(&fixture.admin, records[0].id, Some("checked with finance".into()), vec![])
        .await
        .unwrap();
    assert_eq!(annotated.notes.as_deref(), Some("checked with finance"));

    match engine
        .audit_history(&fixture.buyer, AuditSubject::PurchaseOrder(fixture.order_id))
        .await
    {
        Err(LifecycleError::Unauthorized) => {}
        other => panic!("Expected Unauthorized, got {other:?}"),
    }
}
