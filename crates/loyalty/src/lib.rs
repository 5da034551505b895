//! `swiftmart-loyalty` — settlement, loyalty accrual, and store statistics.
//!
//! Runs after an order reaches a terminal successful state. Tier thresholds
//! and the earning rate are defined once in [`tier`] and derived everywhere
//! else.

pub mod account;
pub mod settlement;
pub mod tier;

pub use account::{LedgerEntry, LedgerEntryKind, LoyaltyAccount};
pub use settlement::{
    SettlementKind, SettlementOutcome, SettlementReceipt, SettlementService, StoreStatistics,
};
pub use tier::{points_for_total, LoyaltyTier, DEFAULT_POINTS_PER_CURRENCY};
