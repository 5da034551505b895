//! Per-customer loyalty balance with an audited ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swiftmart_core::{AggregateId, CustomerId};

use crate::tier::LoyaltyTier;

/// Direction of a ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryKind {
    /// Points credited on delivery.
    Accrual,
    /// Points debited on return. `points` records what was actually removed,
    /// which may be less than the original credit if the balance fell short.
    Reversal,
}

/// One audited balance adjustment. The balance is never written directly;
/// it only moves through these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub order_id: AggregateId,
    pub kind: LedgerEntryKind,
    pub points: u64,
    pub balance_after: u64,
    pub occurred_at: DateTime<Utc>,
}

/// A customer's loyalty state. Tier is derived from the balance on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyAccount {
    customer_id: CustomerId,
    balance: u64,
    entries: Vec<LedgerEntry>,
}

impl LoyaltyAccount {
    pub fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            balance: 0,
            entries: Vec::new(),
        }
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn tier(&self) -> LoyaltyTier {
        LoyaltyTier::for_points(self.balance)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Credit points earned by an order.
    pub fn accrue(&mut self, order_id: AggregateId, points: u64, now: DateTime<Utc>) -> u64 {
        self.balance = self.balance.saturating_add(points);
        self.entries.push(LedgerEntry {
            order_id,
            kind: LedgerEntryKind::Accrual,
            points,
            balance_after: self.balance,
            occurred_at: now,
        });
        self.balance
    }

    /// Debit a prior credit on return. The balance clamps at zero; a
    /// shortfall (points already spent) is logged and the entry records the
    /// amount actually removed.
    pub fn reverse(&mut self, order_id: AggregateId, points: u64, now: DateTime<Utc>) -> u64 {
        let removed = points.min(self.balance);
        if removed < points {
            tracing::warn!(
                customer_id = %self.customer_id,
                %order_id,
                requested = points,
                removed,
                "loyalty reversal shortfall, balance clamped at zero"
            );
        }
        self.balance -= removed;
        self.entries.push(LedgerEntry {
            order_id,
            kind: LedgerEntryKind::Reversal,
            points: removed,
            balance_after: self.balance,
            occurred_at: now,
        });
        self.balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accrual_moves_balance_and_appends_entry() {
        let mut account = LoyaltyAccount::new(CustomerId::new());
        let order_id = AggregateId::new();

        let balance = account.accrue(order_id, 2_500, Utc::now());
        assert_eq!(balance, 2_500);
        assert_eq!(account.tier(), LoyaltyTier::Silver);
        assert_eq!(account.entries().len(), 1);
        assert_eq!(account.entries()[0].kind, LedgerEntryKind::Accrual);
        assert_eq!(account.entries()[0].balance_after, 2_500);
    }

    #[test]
    fn reversal_clamps_at_zero_and_records_actual_removal() {
        let mut account = LoyaltyAccount::new(CustomerId::new());
        let order_id = AggregateId::new();
        account.accrue(order_id, 100, Utc::now());

        // Simulate points spent elsewhere: reverse more than the balance.
        let balance = account.reverse(order_id, 250, Utc::now());
        assert_eq!(balance, 0);

        let entry = account.entries().last().unwrap();
        assert_eq!(entry.kind, LedgerEntryKind::Reversal);
        assert_eq!(entry.points, 100);
        assert_eq!(entry.balance_after, 0);
    }

    #[test]
    fn tier_follows_balance_across_the_ledger() {
        let mut account = LoyaltyAccount::new(CustomerId::new());
        assert_eq!(account.tier(), LoyaltyTier::Bronze);

        account.accrue(AggregateId::new(), 8_000, Utc::now());
        assert_eq!(account.tier(), LoyaltyTier::Gold);

        account.accrue(AggregateId::new(), 2_500, Utc::now());
        assert_eq!(account.tier(), LoyaltyTier::Platinum);

        account.reverse(AggregateId::new(), 2_500, Utc::now());
        assert_eq!(account.tier(), LoyaltyTier::Gold);
    }
}
