//! Lifecycle services: the operations callers actually invoke.
//!
//! Each service method follows the same shape:
//!
//! ```text
//! authorize -> [acquire order lock] -> load -> dispatch command(s) -> audit -> side records
//! ```
//!
//! Aggregates stay pure; everything with IO (locks, gateway calls, payment
//! transactions, audit appends) lives here. Audit appends are best effort:
//! a failed append is logged and the committed state change stands.

mod bulk;
mod inquiry;
pub mod reference;
mod sample;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, warn};

use inflow_bulk::BulkPurchaseOrder;
use inflow_core::{
    Actor, Attachment, AuditRecordId, Auditable, Currency, InquiryId, UserId,
};
use inflow_inquiry::{Inquiry, InquiryCommand};
use inflow_payments::{IntentStatus, LinkLineItem, PaymentGateway, PaymentTransaction};
use inflow_pricing::{CartItem, PricingEngine};
use inflow_purchasing::PurchaseOrder;

use crate::audit::{
    AuditRecord, AuditStore, AuditSubject, AuditTrail, InMemoryAuditStore, PostgresAuditStore,
};
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{LifecycleError, LifecycleResult};
use crate::lock::{InMemoryOrderLock, LockGuard, OrderLock};
use crate::retry::RetryPolicy;
use crate::store::{InMemoryRecordStore, PostgresRecordStore, RecordStore, TransactionLedger};

pub use bulk::{
    BulkCheckout, BulkOrderService, BulkQuotationInput, ChecklistInput, DepositInput, ImportOutcome,
    ImportRow, PreviewOutcome, QcInput,
};
pub use inquiry::{CreatedInquiry, InquiryService, NewInquiry, QuotationInput, QuotedInquiry};
pub use sample::{SampleCheckout, SampleOrderService};

/// Storage, lock and gateway implementations the engine runs on.
pub struct Backends {
    pub inquiries: Arc<dyn RecordStore<Inquiry>>,
    pub purchase_orders: Arc<dyn RecordStore<PurchaseOrder>>,
    pub bulk_orders: Arc<dyn RecordStore<BulkPurchaseOrder>>,
    pub transactions: Arc<dyn RecordStore<PaymentTransaction>>,
    pub audit: Arc<dyn AuditStore>,
    pub lock: Arc<dyn OrderLock>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl Backends {
    /// Everything in process. Tests and local runs.
    pub fn in_memory(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            inquiries: Arc::new(InMemoryRecordStore::<Inquiry>::new()),
            purchase_orders: Arc::new(InMemoryRecordStore::<PurchaseOrder>::new()),
            bulk_orders: Arc::new(InMemoryRecordStore::<BulkPurchaseOrder>::new()),
            transactions: Arc::new(InMemoryRecordStore::<PaymentTransaction>::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
            lock: Arc::new(InMemoryOrderLock::new()),
            gateway,
        }
    }

    /// Postgres for records and audit; the lock is chosen by the caller.
    pub fn postgres(pool: PgPool, lock: Arc<dyn OrderLock>, gateway: Arc<dyn PaymentGateway>) -> Self {
        let pool = Arc::new(pool);
        Self {
            inquiries: Arc::new(PostgresRecordStore::<Inquiry>::from_shared(pool.clone())),
            purchase_orders: Arc::new(PostgresRecordStore::<PurchaseOrder>::from_shared(pool.clone())),
            bulk_orders: Arc::new(PostgresRecordStore::<BulkPurchaseOrder>::from_shared(pool.clone())),
            transactions: Arc::new(PostgresRecordStore::<PaymentTransaction>::from_shared(pool.clone())),
            audit: Arc::new(PostgresAuditStore::from_shared(pool)),
            lock,
            gateway,
        }
    }
}

/// Shared state behind every service.
pub struct EngineContext {
    pub config: EngineConfig,
    pub pricing: PricingEngine,
    pub lock: Arc<dyn OrderLock>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub audit: AuditTrail,
    pub inquiries: Dispatcher<Inquiry>,
    pub purchase_orders: Dispatcher<PurchaseOrder>,
    pub bulk_orders: Dispatcher<BulkPurchaseOrder>,
    pub transactions: TransactionLedger,
}

impl core::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    pub fn new(config: EngineConfig, backends: Backends) -> Self {
        let retry = RetryPolicy::exponential(
            config.audit_max_attempts,
            config.audit_retry_base,
            config.audit_retry_base.saturating_mul(20),
        );
        Self {
            pricing: PricingEngine::new(),
            lock: backends.lock,
            gateway: backends.gateway,
            audit: AuditTrail::new(backends.audit, retry),
            inquiries: Dispatcher::new(backends.inquiries),
            purchase_orders: Dispatcher::new(backends.purchase_orders),
            bulk_orders: Dispatcher::new(backends.bulk_orders),
            transactions: TransactionLedger::new(backends.transactions),
            config,
        }
    }

    pub(crate) async fn acquire(&self, key: String, timeout: Duration) -> LifecycleResult<LockGuard> {
        self.lock.acquire(&key, timeout).await.map_err(|err| {
            warn!(lock_key = %key, error = %err, "order lock not acquired");
            LifecycleError::from(err)
        })
    }

    /// Appends one audit record per auditable event.
    pub(crate) async fn record<E: Auditable + Sync>(
        &self,
        subject: AuditSubject,
        inquiry_id: Option<InquiryId>,
        actor_id: Option<UserId>,
        events: &[E],
    ) {
        let now = Utc::now();
        for entry in events.iter().filter_map(|event| event.audit_entry()) {
            let record = AuditRecord::from_entry(subject, inquiry_id, actor_id, entry, now);
            if let Err(err) = self.audit.append(&record).await {
                error!(
                    subject = subject.kind(),
                    subject_id = %subject.id_string(),
                    error = %err,
                    "audit record lost, state change kept"
                );
            }
        }
    }

    /// Moves the inquiry of a settled sample to `Finished`. The payment is
    /// already committed, so failures are logged only.
    pub(crate) async fn finish_inquiry(&self, inquiry_id: InquiryId, actor_id: Option<UserId>) {
        let command = InquiryCommand::MarkFinished {
            occurred_at: Utc::now(),
        };
        let result = match self.inquiries.load(&inquiry_id).await {
            Ok(inquiry) => self.inquiries.execute_on(inquiry, &command).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(outcome) => {
                self.record(AuditSubject::Inquiry(inquiry_id), Some(inquiry_id), actor_id, &outcome.events)
                    .await
            }
            Err(err) => warn!(%inquiry_id, error = %err, "inquiry not moved to finished"),
        }
    }
}

/// Result of a checkout call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    /// Bank transfer recorded; an admin has to confirm it.
    AwaitingConfirmation { transaction: PaymentTransaction },
    /// The buyer must complete a gateway step (3-D Secure) and come back
    /// through the confirm callback.
    RequiresAction {
        payment_intent_id: String,
        next_action: Option<serde_json::Value>,
    },
    Paid { transaction: PaymentTransaction },
}

/// Result of a gateway confirm callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// `None` when the milestone was already settled before this call.
    Paid { transaction: Option<PaymentTransaction> },
    Unsettled { status: IntentStatus },
}

/// A line as submitted by a caller; ids and totals are assigned here.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LineInput {
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub color: String,
    pub qty: i64,
    /// Zero or absent means "use the quoted price".
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

impl LineInput {
    pub fn into_item(self) -> CartItem {
        let mut item = CartItem::new(self.size, self.color, self.qty, self.unit_price);
        item.note = self.note;
        item
    }
}

pub(crate) fn into_items(lines: Vec<LineInput>) -> Vec<CartItem> {
    lines.into_iter().map(LineInput::into_item).collect()
}

pub(crate) fn require_admin(actor: &Actor) -> LifecycleResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(LifecycleError::Unauthorized)
    }
}

/// Admins, or the buyer who owns the order.
pub(crate) fn require_owner_or_admin(actor: &Actor, owner: Option<UserId>) -> LifecycleResult<()> {
    if actor.is_admin() || (actor.is_buyer() && owner == Some(actor.id)) {
        Ok(())
    } else {
        Err(LifecycleError::Unauthorized)
    }
}

/// Payment link lines in the smallest currency unit; zero parts are skipped.
pub(crate) fn link_lines(
    currency: Currency,
    parts: &[(&str, Decimal)],
) -> LifecycleResult<Vec<LinkLineItem>> {
    let mut lines = Vec::with_capacity(parts.len());
    for (name, amount) in parts {
        if amount.is_zero() {
            continue;
        }
        if amount.is_sign_negative() {
            return Err(LifecycleError::validation(format!(
                "{name} of a payment link cannot be negative"
            )));
        }
        lines.push(LinkLineItem {
            name: (*name).to_string(),
            amount: currency.to_smallest_unit(*amount)?,
            quantity: 1,
        });
    }
    if lines.is_empty() {
        return Err(LifecycleError::validation("nothing to pay"));
    }
    Ok(lines)
}

pub(crate) fn metadata<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// The lifecycle engine: one handle for every service.
#[derive(Debug, Clone)]
pub struct Engine {
    pub inquiries: InquiryService,
    pub samples: SampleOrderService,
    pub bulk: BulkOrderService,
    ctx: Arc<EngineContext>,
}

impl Engine {
    pub fn new(config: EngineConfig, backends: Backends) -> Self {
        let ctx = Arc::new(EngineContext::new(config, backends));
        let samples = SampleOrderService::new(ctx.clone());
        Self {
            inquiries: InquiryService::new(ctx.clone(), samples.clone()),
            bulk: BulkOrderService::new(ctx.clone()),
            samples,
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Audit history of one order, oldest first. Admin only.
    pub async fn audit_history(
        &self,
        actor: &Actor,
        subject: AuditSubject,
    ) -> LifecycleResult<Vec<AuditRecord>> {
        require_admin(actor)?;
        Ok(self.ctx.audit.list(&subject).await?)
    }

    /// Operator notes and attachments on an existing audit record.
    pub async fn annotate_audit(
        &self,
        actor: &Actor,
        id: AuditRecordId,
        notes: Option<String>,
        attachments: Vec<Attachment>,
    ) -> LifecycleResult<AuditRecord> {
        require_admin(actor)?;
        Ok(self.ctx.audit.annotate(id, notes, attachments).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn link_lines_skip_zero_parts_and_convert_units() {
        let lines = link_lines(
            Currency::Usd,
            &[("Subtotal", dec!(120.50)), ("Shipping fee", dec!(0)), ("Tax", dec!(12.05))],
        )
        .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].amount, 12_050);
        assert_eq!(lines[1].name, "Tax");
    }

    #[test]
    fn link_lines_reject_negative_and_empty_links() {
        match link_lines(Currency::Usd, &[("Subtotal", dec!(-1))]) {
            Err(LifecycleError::Validation(msg)) => assert!(msg.contains("Subtotal")),
            other => panic!("Expected Validation, got {other:?}"),
        }
        assert!(matches!(
            link_lines(Currency::Vnd, &[("Tax", Decimal::ZERO)]),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn owners_and_admins_pass_the_owner_gate() {
        let buyer = UserId::new();
        assert!(require_owner_or_admin(&Actor::buyer(buyer), Some(buyer)).is_ok());
        assert!(require_owner_or_admin(&Actor::admin(UserId::new()), Some(buyer)).is_ok());
        assert_eq!(
            require_owner_or_admin(&Actor::buyer(UserId::new()), Some(buyer)),
            Err(LifecycleError::Unauthorized)
        );
        assert_eq!(
            require_owner_or_admin(&Actor::seller(buyer), Some(buyer)),
            Err(LifecycleError::Unauthorized)
        );
    }
}
