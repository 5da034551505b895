//! The inventory ledger service.
//!
//! One `Mutex<StockRecord>` per `StockKey` makes check-then-increment atomic:
//! concurrent `reserve` calls against one record linearize on that lock, so
//! `available >= qty` is still true when `reserved` is incremented. The outer
//! map is only locked to look up or insert record handles.
//!
//! Lock order is record-then-holds everywhere; never the reverse.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use swiftmart_core::{AggregateId, DomainError, DomainResult};

use crate::stock::{
    AdjustReason, HoldId, HoldState, InventoryEvent, ReservationHold, StockKey, StockRecord,
};

/// In-memory inventory ledger.
///
/// Stock records are created when a product/variant is first stocked and are
/// never removed while the parent product exists. Holds are kept after
/// resolution (append-only audit of claims).
#[derive(Debug, Default)]
pub struct InventoryLedger {
    records: RwLock<HashMap<StockKey, Arc<Mutex<StockRecord>>>>,
    holds: Mutex<HashMap<HoldId, ReservationHold>>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the stock record for a key (initial stocking).
    pub fn stock_item(&self, key: StockKey, record: StockRecord) -> DomainResult<()> {
        record.check_integrity()?;
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(key, Arc::new(Mutex::new(record)));
        Ok(())
    }

    /// Snapshot of one stock record.
    pub fn stock(&self, key: &StockKey) -> Option<StockRecord> {
        let arc = {
            let records = self.records.read().ok()?;
            records.get(key)?.clone()
        };
        let rec = arc.lock().ok()?;
        Some(rec.clone())
    }

    /// Snapshot of one hold.
    pub fn hold(&self, hold_id: HoldId) -> Option<ReservationHold> {
        let holds = self.holds.lock().ok()?;
        holds.get(&hold_id).cloned()
    }

    /// All holds created for one order, in any state.
    pub fn holds_for_order(&self, order_id: AggregateId) -> Vec<ReservationHold> {
        match self.holds.lock() {
            Ok(holds) => {
                let mut out: Vec<_> = holds
                    .values()
                    .filter(|h| h.order_id == order_id)
                    .cloned()
                    .collect();
                out.sort_by_key(|h| h.created_at);
                out
            }
            Err(_) => Vec::new(),
        }
    }

    /// Atomically claim `quantity` units for an order.
    ///
    /// Fails with `ResourceExhausted` and no side effects when fewer than
    /// `quantity` units are available.
    pub fn reserve(
        &self,
        order_id: AggregateId,
        key: StockKey,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<HoldId> {
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let arc = self.record_handle(&key)?;
        let mut rec = arc.lock().map_err(|_| poisoned())?;
        self.abort_on_corruption(&key, &rec)?;

        if rec.available() < quantity {
            return Err(DomainError::exhausted(format!(
                "insufficient stock: requested {quantity}, available {}",
                rec.available()
            )));
        }
        rec.reserved += quantity;

        let hold = ReservationHold {
            hold_id: HoldId::new(),
            order_id,
            key,
            quantity,
            state: HoldState::Open,
            created_at: now,
        };
        let hold_id = hold.hold_id;

        // Record lock is still held; holds lock nests inside it.
        let mut holds = self.holds.lock().map_err(|_| poisoned())?;
        holds.insert(hold_id, hold);

        tracing::debug!(%hold_id, quantity, "stock reserved");
        Ok(hold_id)
    }

    /// Reserve every line of an order, all-or-nothing.
    ///
    /// Either every line gets a hold, or no reservation survives: on the
    /// first failure all holds already made for this call are released and
    /// the failure is returned unchanged.
    pub fn reserve_all(
        &self,
        order_id: AggregateId,
        lines: &[(StockKey, u32)],
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<HoldId>> {
        let mut made = Vec::with_capacity(lines.len());
        for (key, quantity) in lines {
            match self.reserve(order_id, *key, *quantity, now) {
                Ok(hold_id) => made.push(hold_id),
                Err(err) => {
                    for hold_id in made {
                        // Rollback is best-effort; these holds are open by
                        // construction so release cannot conflict.
                        let _ = self.release(hold_id, now);
                    }
                    return Err(err);
                }
            }
        }
        Ok(made)
    }

    /// Convert a hold into a permanent decrement.
    ///
    /// Idempotent: committing an already-committed hold is a no-op.
    /// Committing a released hold is a conflict (the claim is gone).
    pub fn commit(&self, hold_id: HoldId, now: DateTime<Utc>) -> DomainResult<Vec<InventoryEvent>> {
        let (key, quantity) = match self.hold_snapshot(hold_id)? {
            (k, q, HoldState::Open) => (k, q),
            (_, _, HoldState::Committed) => return Ok(Vec::new()),
            (_, _, HoldState::Released) => {
                return Err(DomainError::conflict("cannot commit a released hold"));
            }
        };

        let arc = self.record_handle(&key)?;
        let mut rec = arc.lock().map_err(|_| poisoned())?;
        let mut holds = self.holds.lock().map_err(|_| poisoned())?;

        // Re-check under both locks; another caller may have resolved the
        // hold between the snapshot and here.
        let hold = holds.get_mut(&hold_id).ok_or(DomainError::NotFound)?;
        match hold.state {
            HoldState::Committed => return Ok(Vec::new()),
            HoldState::Released => {
                return Err(DomainError::conflict("cannot commit a released hold"));
            }
            HoldState::Open => {}
        }

        self.abort_on_corruption(&key, &rec)?;
        if rec.reserved < quantity || rec.on_hand < quantity {
            return Err(DomainError::invariant(format!(
                "hold {hold_id} exceeds record quantities (on_hand {}, reserved {})",
                rec.on_hand, rec.reserved
            )));
        }

        rec.on_hand -= quantity;
        rec.reserved -= quantity;
        hold.state = HoldState::Committed;

        let mut events = vec![InventoryEvent::HoldCommitted {
            hold_id,
            key,
            quantity,
            occurred_at: now,
        }];
        if rec.is_low() {
            events.push(InventoryEvent::LowStockDetected {
                key,
                available: rec.available(),
                threshold: rec.low_stock_threshold,
                occurred_at: now,
            });
        }
        tracing::info!(%hold_id, quantity, "hold committed");
        Ok(events)
    }

    /// Cancel a hold, returning its quantity to available stock.
    ///
    /// Idempotent for already-released and already-committed holds: the
    /// reserved quantity is never given back twice.
    pub fn release(
        &self,
        hold_id: HoldId,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<InventoryEvent>> {
        let (key, quantity) = match self.hold_snapshot(hold_id)? {
            (k, q, HoldState::Open) => (k, q),
            (_, _, HoldState::Committed) | (_, _, HoldState::Released) => return Ok(Vec::new()),
        };

        let arc = self.record_handle(&key)?;
        let mut rec = arc.lock().map_err(|_| poisoned())?;
        let mut holds = self.holds.lock().map_err(|_| poisoned())?;

        let hold = holds.get_mut(&hold_id).ok_or(DomainError::NotFound)?;
        match hold.state {
            HoldState::Committed | HoldState::Released => return Ok(Vec::new()),
            HoldState::Open => {}
        }

        self.abort_on_corruption(&key, &rec)?;
        if rec.reserved < quantity {
            return Err(DomainError::invariant(format!(
                "hold {hold_id} exceeds reserved quantity ({})",
                rec.reserved
            )));
        }

        rec.reserved -= quantity;
        hold.state = HoldState::Released;

        tracing::info!(%hold_id, quantity, "hold released");
        Ok(vec![InventoryEvent::HoldReleased {
            hold_id,
            key,
            quantity,
            occurred_at: now,
        }])
    }

    /// Manual stock correction. Bypasses holds; only `on_hand` moves.
    ///
    /// An adjustment that would push `on_hand` below the open reserved
    /// quantity is rejected (it would break the ledger invariant).
    pub fn adjust(
        &self,
        key: StockKey,
        delta: i64,
        reason: AdjustReason,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<InventoryEvent>> {
        if delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }

        let arc = self.record_handle(&key)?;
        let mut rec = arc.lock().map_err(|_| poisoned())?;
        self.abort_on_corruption(&key, &rec)?;

        let new_on_hand = i64::from(rec.on_hand) + delta;
        if new_on_hand < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }
        if new_on_hand < i64::from(rec.reserved) {
            return Err(DomainError::conflict(format!(
                "adjustment would drop on_hand below reserved ({})",
                rec.reserved
            )));
        }
        rec.on_hand = new_on_hand as u32;

        let mut events = vec![InventoryEvent::StockAdjusted {
            key,
            delta,
            reason,
            occurred_at: now,
        }];
        if rec.is_low() {
            events.push(InventoryEvent::LowStockDetected {
                key,
                available: rec.available(),
                threshold: rec.low_stock_threshold,
                occurred_at: now,
            });
        }
        tracing::info!(delta, "stock adjusted");
        Ok(events)
    }

    fn record_handle(&self, key: &StockKey) -> DomainResult<Arc<Mutex<StockRecord>>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        records.get(key).cloned().ok_or(DomainError::NotFound)
    }

    fn hold_snapshot(&self, hold_id: HoldId) -> DomainResult<(StockKey, u32, HoldState)> {
        let holds = self.holds.lock().map_err(|_| poisoned())?;
        let hold = holds.get(&hold_id).ok_or(DomainError::NotFound)?;
        Ok((hold.key, hold.quantity, hold.state))
    }

    fn abort_on_corruption(&self, key: &StockKey, rec: &StockRecord) -> DomainResult<()> {
        if let Err(err) = rec.check_integrity() {
            tracing::error!(?key, %err, "inventory record corrupted, aborting operation");
            return Err(err);
        }
        Ok(())
    }
}

fn poisoned() -> DomainError {
    DomainError::invariant("ledger lock poisoned")
}
