//! Post-delivery settlement: point accrual, tier recomputation, store
//! statistics.
//!
//! Each settlement is keyed on (order, kind) and applied at most once; a
//! duplicate delivery or return report is answered with the original receipt
//! and changes nothing.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swiftmart_core::{AggregateId, CustomerId, DomainError, DomainResult, Money, StoreId};

use crate::account::LoyaltyAccount;
use crate::tier::{points_for_total, LoyaltyTier};

/// Which settlement step a key covers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    DeliveryAccrual,
    ReturnReversal,
}

/// Per-store sales counters, updated at settlement time only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub orders_sold: u64,
    pub revenue: Money,
}

/// What a settlement did to the customer's loyalty state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub order_id: AggregateId,
    pub kind: SettlementKind,
    pub order_total: Money,
    pub points: u64,
    pub balance: u64,
    pub tier_before: LoyaltyTier,
    pub tier_after: LoyaltyTier,
    pub settled_at: DateTime<Utc>,
}

/// Outcome of a settlement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Applied(SettlementReceipt),
    /// The (order, kind) key was already settled; the stored receipt is
    /// returned unchanged.
    AlreadyApplied(SettlementReceipt),
}

impl SettlementOutcome {
    pub fn receipt(&self) -> &SettlementReceipt {
        match self {
            Self::Applied(r) | Self::AlreadyApplied(r) => r,
        }
    }
}

#[derive(Debug, Default)]
struct SettlementState {
    accounts: HashMap<CustomerId, LoyaltyAccount>,
    statistics: HashMap<StoreId, StoreStatistics>,
    applied: HashMap<(AggregateId, SettlementKind), SettlementReceipt>,
}

/// The settlement service. Shared across orchestrator workers.
#[derive(Debug)]
pub struct SettlementService {
    points_per_currency: f64,
    state: Mutex<SettlementState>,
}

impl SettlementService {
    pub fn new(points_per_currency: f64) -> Self {
        Self {
            points_per_currency,
            state: Mutex::new(SettlementState::default()),
        }
    }

    /// Credit points and bump store statistics for a delivered order.
    pub fn settle_delivery(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        store_id: StoreId,
        order_total: Money,
        now: DateTime<Utc>,
    ) -> DomainResult<SettlementOutcome> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;

        let key = (order_id, SettlementKind::DeliveryAccrual);
        if let Some(receipt) = state.applied.get(&key) {
            tracing::debug!(%order_id, "delivery settlement already applied");
            return Ok(SettlementOutcome::AlreadyApplied(receipt.clone()));
        }

        let points = points_for_total(order_total, self.points_per_currency);
        let account = state
            .accounts
            .entry(customer_id)
            .or_insert_with(|| LoyaltyAccount::new(customer_id));
        let tier_before = account.tier();
        let balance = account.accrue(order_id, points, now);
        let tier_after = account.tier();

        if tier_after > tier_before {
            tracing::info!(%customer_id, %tier_before, %tier_after, "loyalty tier promoted");
        }

        let stats = state.statistics.entry(store_id).or_default();
        stats.orders_sold += 1;
        stats.revenue = stats.revenue.add(order_total)?;

        let receipt = SettlementReceipt {
            order_id,
            kind: SettlementKind::DeliveryAccrual,
            order_total,
            points,
            balance,
            tier_before,
            tier_after,
            settled_at: now,
        };
        state.applied.insert(key, receipt.clone());
        tracing::info!(%order_id, %customer_id, points, balance, "delivery settled");
        Ok(SettlementOutcome::Applied(receipt))
    }

    /// Undo the delivery accrual for a returned order and roll back the
    /// store's counters. Requires the delivery settlement to have happened.
    pub fn settle_return(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        store_id: StoreId,
        now: DateTime<Utc>,
    ) -> DomainResult<SettlementOutcome> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;

        let key = (order_id, SettlementKind::ReturnReversal);
        if let Some(receipt) = state.applied.get(&key) {
            tracing::debug!(%order_id, "return settlement already applied");
            return Ok(SettlementOutcome::AlreadyApplied(receipt.clone()));
        }

        let accrual = state
            .applied
            .get(&(order_id, SettlementKind::DeliveryAccrual))
            .cloned()
            .ok_or_else(|| DomainError::conflict("order was never settled for delivery"))?;

        let account = state
            .accounts
            .get_mut(&customer_id)
            .ok_or(DomainError::NotFound)?;
        let tier_before = account.tier();
        let balance = account.reverse(order_id, accrual.points, now);
        let tier_after = account.tier();

        if let Some(stats) = state.statistics.get_mut(&store_id) {
            stats.orders_sold = stats.orders_sold.saturating_sub(1);
            stats.revenue = match stats.revenue.sub(accrual.order_total) {
                Ok(revenue) => revenue,
                Err(_) => {
                    tracing::warn!(%store_id, "store revenue reversal clamped at zero");
                    Money::ZERO
                }
            };
        }

        let receipt = SettlementReceipt {
            order_id,
            kind: SettlementKind::ReturnReversal,
            order_total: accrual.order_total,
            points: accrual.points,
            balance,
            tier_before,
            tier_after,
            settled_at: now,
        };
        state.applied.insert(key, receipt.clone());
        tracing::info!(%order_id, %customer_id, points = accrual.points, balance, "return settled");
        Ok(SettlementOutcome::Applied(receipt))
    }

    pub fn account(&self, customer_id: CustomerId) -> Option<LoyaltyAccount> {
        let state = self.state.lock().ok()?;
        state.accounts.get(&customer_id).cloned()
    }

    pub fn statistics(&self, store_id: StoreId) -> StoreStatistics {
        match self.state.lock() {
            Ok(state) => state.statistics.get(&store_id).cloned().unwrap_or_default(),
            Err(_) => StoreStatistics::default(),
        }
    }
}

fn poisoned() -> DomainError {
    DomainError::invariant("settlement state lock poisoned")
}
