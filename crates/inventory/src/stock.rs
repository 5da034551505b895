use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use swiftmart_core::{AggregateId, DomainError, DomainResult, ProductId, StoreId, VariantId};
use swiftmart_events::Event;

/// Identity of one stock record: (product, variant, store).
///
/// Products without variants use `variant_id = None`; a product and one of
/// its variants are distinct records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub store_id: StoreId,
}

/// Identifier of a reservation hold.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoldId(Uuid);

impl HoldId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for HoldId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for HoldId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One stock record: on-hand quantity plus open reservations.
///
/// Invariant: `reserved <= on_hand`; `available = on_hand - reserved` is
/// never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub on_hand: u32,
    pub reserved: u32,
    pub low_stock_threshold: u32,
    pub reorder_point: u32,
    pub reorder_quantity: u32,
}

impl StockRecord {
    pub fn new(on_hand: u32, low_stock_threshold: u32) -> Self {
        Self {
            on_hand,
            reserved: 0,
            low_stock_threshold,
            reorder_point: 0,
            reorder_quantity: 0,
        }
    }

    pub fn available(&self) -> u32 {
        self.on_hand.saturating_sub(self.reserved)
    }

    pub fn is_low(&self) -> bool {
        self.available() <= self.low_stock_threshold
    }

    /// Detect a corrupted record. `reserved > on_hand` cannot be produced by
    /// the ledger operations; finding it is bug-class and aborts the caller.
    pub fn check_integrity(&self) -> DomainResult<()> {
        if self.reserved > self.on_hand {
            return Err(DomainError::invariant(format!(
                "reserved ({}) exceeds on_hand ({})",
                self.reserved, self.on_hand
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a reservation hold.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldState {
    /// Stock is claimed but not yet decremented.
    Open,
    /// The claim became a permanent decrement.
    Committed,
    /// The claim was cancelled and the quantity returned to available.
    Released,
}

/// A temporary claim on stock pending order confirmation.
///
/// Owned by the ledger; orders reference holds by id but never mutate them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationHold {
    pub hold_id: HoldId,
    pub order_id: AggregateId,
    pub key: StockKey,
    pub quantity: u32,
    pub state: HoldState,
    pub created_at: DateTime<Utc>,
}

/// Why a manual stock adjustment happened (audit trail).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdjustReason {
    /// Store-owner correction (recount, damage, shrinkage).
    Manual { note: String },
    /// Compensating restock for an order cancelled after stock was committed.
    OrderCancelled { order_id: AggregateId },
    /// Restock for a returned order.
    OrderReturned { order_id: AggregateId },
}

/// Facts emitted by ledger operations.
///
/// Reservations emit nothing here: the hold itself is the durable record of
/// a claim and is queryable until resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    HoldCommitted {
        hold_id: HoldId,
        key: StockKey,
        quantity: u32,
        occurred_at: DateTime<Utc>,
    },
    HoldReleased {
        hold_id: HoldId,
        key: StockKey,
        quantity: u32,
        occurred_at: DateTime<Utc>,
    },
    StockAdjusted {
        key: StockKey,
        delta: i64,
        reason: AdjustReason,
        occurred_at: DateTime<Utc>,
    },
    /// Available quantity dropped to or below the record's threshold.
    LowStockDetected {
        key: StockKey,
        available: u32,
        threshold: u32,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::HoldCommitted { .. } => "inventory.hold.committed",
            InventoryEvent::HoldReleased { .. } => "inventory.hold.released",
            InventoryEvent::StockAdjusted { .. } => "inventory.stock.adjusted",
            InventoryEvent::LowStockDetected { .. } => "inventory.stock.low",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::HoldCommitted { occurred_at, .. }
            | InventoryEvent::HoldReleased { occurred_at, .. }
            | InventoryEvent::StockAdjusted { occurred_at, .. }
            | InventoryEvent::LowStockDetected { occurred_at, .. } => *occurred_at,
        }
    }
}
