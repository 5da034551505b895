//! In-memory append-only store for order event streams.
//!
//! One stream per order, envelope sequence numbers starting at 1. Appends
//! carry an optimistic concurrency expectation: the second of two racing
//! writers observes the post-transition version and gets a conflict instead
//! of silently overwriting.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use swiftmart_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, ExpectedVersion,
};
use swiftmart_events::EventEnvelope;
use swiftmart_orders::{Order, OrderCommand, OrderEvent, OrderId};

pub const ORDER_AGGREGATE_TYPE: &str = "order";

#[derive(Debug, Default)]
pub struct OrderStore {
    streams: RwLock<HashMap<AggregateId, Vec<EventEnvelope<OrderEvent>>>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full event history for an order (empty if unknown).
    pub fn load(&self, order_id: OrderId) -> DomainResult<Vec<EventEnvelope<OrderEvent>>> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams.get(&order_id.0).cloned().unwrap_or_default())
    }

    /// Rebuild current order state from its stream.
    pub fn rehydrate(&self, order_id: OrderId) -> DomainResult<Order> {
        let stream = self.load(order_id)?;
        let mut order = Order::empty(order_id);
        for envelope in &stream {
            order.apply(envelope.payload());
        }
        Ok(order)
    }

    /// The command pipeline: load, rehydrate, handle, append, in that order.
    ///
    /// The append re-checks the version read at load time, so two concurrent
    /// `execute` calls on one order serialize: the loser returns a conflict
    /// and no partial write survives.
    pub fn execute(
        &self,
        order_id: OrderId,
        command: &OrderCommand,
    ) -> DomainResult<(Order, Vec<EventEnvelope<OrderEvent>>)> {
        let mut order = self.rehydrate(order_id)?;
        let loaded_version = order.version();

        let events = order.handle(command)?;
        if events.is_empty() {
            return Ok((order, Vec::new()));
        }

        let envelopes =
            self.append(order_id, events.clone(), ExpectedVersion::Exact(loaded_version))?;
        for event in &events {
            order.apply(event);
        }
        Ok((order, envelopes))
    }

    fn append(
        &self,
        order_id: OrderId,
        events: Vec<OrderEvent>,
        expected_version: ExpectedVersion,
    ) -> DomainResult<Vec<EventEnvelope<OrderEvent>>> {
        let mut streams = self.streams.write().map_err(|_| poisoned())?;
        let stream = streams.entry(order_id.0).or_default();

        let current = stream.last().map(|e| e.sequence_number()).unwrap_or(0);
        expected_version.check(current)?;

        let mut next = current + 1;
        let mut appended = Vec::with_capacity(events.len());
        for event in events {
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                order_id.0,
                ORDER_AGGREGATE_TYPE,
                next,
                event,
            );
            next += 1;
            stream.push(envelope.clone());
            appended.push(envelope);
        }
        Ok(appended)
    }
}

fn poisoned() -> DomainError {
    DomainError::invariant("order store lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use swiftmart_core::{CustomerId, Money, ProductId, StoreId};
    use swiftmart_orders::{
        DeliveryAddress, OrderLine, OrderNumber, OrderStatus, PaymentMethod, PlaceOrder,
        StartProcessing,
    };

    fn place_command(order_id: OrderId) -> OrderCommand {
        OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            order_number: OrderNumber::from_sequence(1),
            customer_id: CustomerId::new(),
            store_id: StoreId::new(),
            lines: vec![OrderLine {
                product_id: ProductId::new(),
                variant_id: None,
                quantity: 1,
                unit_price: Money::from_minor(1_000),
            }],
            discount: Money::ZERO,
            shipping_fee: Money::ZERO,
            tax: Money::ZERO,
            payment_method: PaymentMethod::Card,
            address: DeliveryAddress {
                recipient: "N. Hassan".into(),
                street: "12 Canal Road".into(),
                city: "Lahore".into(),
                notes: None,
            },
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn execute_appends_and_rehydrates() {
        let store = OrderStore::new();
        let order_id = OrderId::new(AggregateId::new());

        let (order, envelopes) = store.execute(order_id, &place_command(order_id)).unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].sequence_number(), 1);
        assert_eq!(envelopes[0].aggregate_type(), ORDER_AGGREGATE_TYPE);

        let rebuilt = store.rehydrate(order_id).unwrap();
        assert_eq!(rebuilt.status(), OrderStatus::Pending);
        assert_eq!(rebuilt.version(), 1);
    }

    #[test]
    fn failed_commands_leave_the_stream_untouched() {
        let store = OrderStore::new();
        let order_id = OrderId::new(AggregateId::new());
        store.execute(order_id, &place_command(order_id)).unwrap();

        // Pending -> processing skips confirmation and must fail.
        let err = store
            .execute(
                order_id,
                &OrderCommand::StartProcessing(StartProcessing {
                    order_id,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(store.load(order_id).unwrap().len(), 1);
    }

    #[test]
    fn stale_append_is_a_conflict() {
        let store = OrderStore::new();
        let order_id = OrderId::new(AggregateId::new());
        store.execute(order_id, &place_command(order_id)).unwrap();

        // A writer that loaded version 0 lost the race to the placement above.
        let stale = OrderEvent::OrderConfirmed(swiftmart_orders::order::OrderConfirmed {
            order_id,
            occurred_at: Utc::now(),
        });
        let err = store
            .append(order_id, vec![stale], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(store.load(order_id).unwrap().len(), 1);
    }
}
