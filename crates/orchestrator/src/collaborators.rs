//! External collaborator seams: payment gateway and notifications.
//!
//! Both are traits so the orchestrator can be wired with real integrations
//! in production and recording fakes in tests. Payment calls participate in
//! the fulfillment flow and can fail it; notifications are fire-and-forget.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use swiftmart_core::{AccountId, AggregateId, DomainError, DomainResult, Money, ProductId, VariantId};
use swiftmart_orders::PaymentMethod;

/// Gateway answer to an authorization request. A decline is a business
/// outcome, not an error; gateway outages surface as `DomainError::Dependency`
/// and are retried by policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    Authorized { reference: String },
    Declined { reason: String },
}

pub trait PaymentGateway: Send + Sync {
    fn authorize(
        &self,
        order_id: AggregateId,
        amount: Money,
        method: PaymentMethod,
    ) -> DomainResult<AuthorizationResult>;

    fn capture(&self, order_id: AggregateId, amount: Money) -> DomainResult<()>;

    fn refund(&self, order_id: AggregateId, amount: Money) -> DomainResult<()>;
}

/// Outbound notification to a platform account. Delivery is best-effort;
/// failures are logged and never fail the triggering operation.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: AccountId, subject: &str, body: &str);
}

/// Read-only price lookup used at placement time. Line prices are
/// snapshotted into the order and never re-read afterwards.
pub trait Catalog: Send + Sync {
    fn unit_price(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
    ) -> DomainResult<Money>;
}

/// Catalog backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    prices: RwLock<HashMap<(ProductId, Option<VariantId>), Money>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        price: Money,
    ) {
        if let Ok(mut prices) = self.prices.write() {
            prices.insert((product_id, variant_id), price);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn unit_price(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
    ) -> DomainResult<Money> {
        let prices = self
            .prices
            .read()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?;
        prices
            .get(&(product_id, variant_id))
            .copied()
            .ok_or(DomainError::NotFound)
    }
}

/// Gateway that approves everything. Default wiring for demos and tests that
/// are not about payment behavior.
#[derive(Debug, Default)]
pub struct AlwaysApprovePayment;

impl PaymentGateway for AlwaysApprovePayment {
    fn authorize(
        &self,
        order_id: AggregateId,
        amount: Money,
        _method: PaymentMethod,
    ) -> DomainResult<AuthorizationResult> {
        Ok(AuthorizationResult::Authorized {
            reference: format!("auth-{order_id}-{amount}"),
        })
    }

    fn capture(&self, _order_id: AggregateId, _amount: Money) -> DomainResult<()> {
        Ok(())
    }

    fn refund(&self, _order_id: AggregateId, _amount: Money) -> DomainResult<()> {
        Ok(())
    }
}

/// Notifier that writes to the log.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, recipient: AccountId, subject: &str, body: &str) {
        tracing::info!(%recipient, subject, body, "notification sent");
    }
}

/// Notifier that records every message for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(AccountId, String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(AccountId, String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, recipient: AccountId, subject: &str, body: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((recipient, subject.to_string(), body.to_string()));
        }
    }
}
