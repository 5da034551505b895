//! `swiftmart-inventory` — the inventory ledger.
//!
//! Holds per-(product, variant, store) stock counts and reservation holds.
//! Every mutating operation on one stock record is serialized through a
//! per-key lock, so concurrent reservations against the same record
//! linearize and stock can never be oversold.

pub mod ledger;
pub mod stock;

pub use ledger::InventoryLedger;
pub use stock::{
    AdjustReason, HoldId, HoldState, InventoryEvent, ReservationHold, StockKey, StockRecord,
};
