use serde::{Deserialize, Serialize};

/// Order status lifecycle.
///
/// Success path: `Pending → Confirmed → Processing → Shipped → Delivering →
/// Delivered`. `Cancelled` is reachable from every non-terminal state before
/// delivery; `Returned` only from `Delivered` within the return window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivering,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    /// Whether `self → next` is an edge of the transition graph.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivering)
                | (Shipped, Delivered)
                | (Delivering, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Processing, Cancelled)
                | (Shipped, Cancelled)
                | (Delivering, Cancelled)
                | (Delivered, Returned)
        )
    }

    /// No further transitions leave these states (`Delivered` still admits a
    /// return while the window is open; window enforcement lives on the
    /// aggregate).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled | OrderStatus::Returned
        )
    }

    /// Whether cancellation is still possible from this state.
    pub fn is_cancellable(self) -> bool {
        self.can_transition_to(OrderStatus::Cancelled)
    }

    /// Whether inventory holds for this order have been committed
    /// (permanently decremented) rather than merely reserved.
    ///
    /// Commit happens at the `Processing → Shipped` transition, so anything
    /// at or past `Shipped` needs a restock adjustment on cancel/return, not
    /// a hold release.
    pub fn inventory_committed(self) -> bool {
        matches!(
            self,
            OrderStatus::Shipped | OrderStatus::Delivering | OrderStatus::Delivered
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    const ALL: [OrderStatus; 8] = [
        Pending, Confirmed, Processing, Shipped, Delivering, Delivered, Cancelled, Returned,
    ];

    #[test]
    fn success_path_edges_exist() {
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivering));
        assert!(Delivering.can_transition_to(Delivered));
        assert!(Shipped.can_transition_to(Delivered));
    }

    #[test]
    fn no_edges_leave_terminal_states() {
        for next in ALL {
            assert!(!Cancelled.can_transition_to(next));
            assert!(!Returned.can_transition_to(next));
        }
    }

    #[test]
    fn no_backward_edges() {
        assert!(!Delivered.can_transition_to(Processing));
        assert!(!Shipped.can_transition_to(Confirmed));
        assert!(!Confirmed.can_transition_to(Pending));
    }

    #[test]
    fn delivered_cannot_be_cancelled_only_returned() {
        assert!(!Delivered.is_cancellable());
        assert!(Delivered.can_transition_to(Returned));
    }

    #[test]
    fn inventory_committed_tracks_ship_boundary() {
        assert!(!Processing.inventory_committed());
        assert!(Shipped.inventory_committed());
        assert!(Delivering.inventory_committed());
        assert!(Delivered.inventory_committed());
    }
}
