//! The fulfillment orchestrator.
//!
//! Sole writer of order status. Every entry point takes an explicit
//! [`CallerContext`]; per-order critical sections run under a per-order mutex
//! so a cancel racing a ship serializes instead of interleaving their
//! compensations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swiftmart_accounts::{Account, RoleProfile};
use swiftmart_core::{
    AccountId, AggregateId, CallerContext, CourierId, CustomerId, DomainError, DomainResult,
    Entity, Money, ProductId, Role, StoreId, VariantId,
};
use swiftmart_dispatch::{
    Availability, CourierPresence, DispatchEngine, DispatchOffer, DispatchOutcome, Location,
    OfferId,
};
use swiftmart_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use swiftmart_inventory::{
    AdjustReason, HoldState, InventoryEvent, InventoryLedger, StockKey, StockRecord,
};
use swiftmart_loyalty::{LoyaltyAccount, SettlementReceipt, SettlementService, StoreStatistics};
use swiftmart_orders::{
    CancelOrder, ConfirmOrder, DeliveryAddress, MarkDelivered, MarkDelivering, MarkShipped, Order,
    OrderCommand, OrderEvent, OrderId, OrderLine, OrderNumber, OrderStatus, PaymentMethod,
    PaymentStatus, PlaceOrder, ReturnOrder, StartProcessing,
};

use crate::collaborators::{AuthorizationResult, Catalog, Notifier, PaymentGateway};
use crate::config::FulfillmentConfig;
use crate::order_store::OrderStore;

/// One cart line as handed over by checkout. Carries no price: unit prices
/// are snapshotted from the catalog at placement time, never trusted from
/// the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

/// Validated cart handed over by checkout. Totals are recomputed by the
/// order aggregate from catalog prices, never taken from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub customer_id: CustomerId,
    pub store_id: StoreId,
    pub lines: Vec<CartLine>,
    pub discount: Money,
    pub shipping_fee: Money,
    pub tax: Money,
    pub payment_method: PaymentMethod,
    pub address: DeliveryAddress,
}

/// What a successful placement returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub total: Money,
}

pub struct FulfillmentOrchestrator {
    config: FulfillmentConfig,
    orders: OrderStore,
    ledger: Arc<InventoryLedger>,
    dispatch: Arc<DispatchEngine>,
    settlement: Arc<SettlementService>,
    payments: Arc<dyn PaymentGateway>,
    catalog: Arc<dyn Catalog>,
    notifier: Arc<dyn Notifier>,
    bus: Arc<InMemoryEventBus<EventEnvelope<OrderEvent>>>,
    accounts: RwLock<HashMap<AccountId, Account>>,
    order_locks: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
    order_sequence: AtomicU64,
}

impl FulfillmentOrchestrator {
    pub fn new(
        config: FulfillmentConfig,
        payments: Arc<dyn PaymentGateway>,
        catalog: Arc<dyn Catalog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders: OrderStore::new(),
            ledger: Arc::new(InventoryLedger::new()),
            dispatch: Arc::new(DispatchEngine::new(config.dispatch)),
            settlement: Arc::new(SettlementService::new(config.points_per_currency)),
            payments,
            catalog,
            notifier,
            bus: Arc::new(InMemoryEventBus::new()),
            accounts: RwLock::new(HashMap::new()),
            order_locks: Mutex::new(HashMap::new()),
            order_sequence: AtomicU64::new(1),
            config,
        }
    }

    /// Observe the order event feed (at-least-once).
    pub fn subscribe(&self) -> Subscription<EventEnvelope<OrderEvent>> {
        self.bus.subscribe()
    }

    // ---- accounts ----

    /// Register a platform account. Suspension and verification gates apply
    /// from the next call on.
    pub fn register_account(&self, account: Account) -> DomainResult<()> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        accounts.insert(*Entity::id(&account), account);
        Ok(())
    }

    fn ensure_active(&self, ctx: &CallerContext) -> DomainResult<()> {
        let accounts = self.accounts.read().map_err(|_| poisoned())?;
        let account = accounts.get(&ctx.account_id()).ok_or(DomainError::NotFound)?;
        if account.role() != ctx.role() || !account.can_transact() {
            return Err(DomainError::Unauthorized);
        }
        Ok(())
    }

    /// The courier identity bound to the caller's account. Courier entry
    /// points act on this id, never on a caller-supplied one.
    fn courier_for_caller(&self, ctx: &CallerContext) -> DomainResult<CourierId> {
        let accounts = self.accounts.read().map_err(|_| poisoned())?;
        let account = accounts.get(&ctx.account_id()).ok_or(DomainError::NotFound)?;
        match account.profile() {
            RoleProfile::Courier(profile) => Ok(profile.courier_id),
            _ => Err(DomainError::Unauthorized),
        }
    }

    /// Admins may manage any courier; couriers only themselves.
    fn ensure_courier_binding(&self, ctx: &CallerContext, courier_id: CourierId) -> DomainResult<()> {
        if ctx.role() == Role::Courier && self.courier_for_caller(ctx)? != courier_id {
            return Err(DomainError::Unauthorized);
        }
        Ok(())
    }

    fn store_owner_account(&self, store_id: StoreId) -> Option<AccountId> {
        let accounts = self.accounts.read().ok()?;
        accounts.values().find_map(|account| match account.profile() {
            RoleProfile::StoreOwner(profile) if profile.store_id == store_id => {
                Some(*Entity::id(account))
            }
            _ => None,
        })
    }

    fn courier_account(&self, courier_id: CourierId) -> Option<AccountId> {
        let accounts = self.accounts.read().ok()?;
        accounts.values().find_map(|account| match account.profile() {
            RoleProfile::Courier(profile) if profile.courier_id == courier_id => {
                Some(*Entity::id(account))
            }
            _ => None,
        })
    }

    // ---- placement ----

    /// Place an order: snapshot catalog prices, reserve stock for every line
    /// all-or-nothing, authorize payment, confirm.
    ///
    /// Failure shapes: `NotFound` for a line missing from the catalog,
    /// `ResourceExhausted` when any line cannot be reserved (nothing stays
    /// reserved), `Validation` when the gateway declines (reservation
    /// released, order cancelled). A persistently unreachable gateway leaves
    /// the order pending with its reservation intact and surfaces
    /// `Dependency`.
    pub fn place_order(
        &self,
        ctx: &CallerContext,
        request: PlaceOrderRequest,
        now: DateTime<Utc>,
    ) -> DomainResult<PlacedOrder> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::Customer])?;

        let mut lines = Vec::with_capacity(request.lines.len());
        for cart in &request.lines {
            let unit_price = self.catalog.unit_price(cart.product_id, cart.variant_id)?;
            lines.push(OrderLine {
                product_id: cart.product_id,
                variant_id: cart.variant_id,
                quantity: cart.quantity,
                unit_price,
            });
        }

        let order_id = OrderId::new(AggregateId::new());
        let reservation_lines: Vec<(StockKey, u32)> = request
            .lines
            .iter()
            .map(|line| {
                (
                    StockKey {
                        product_id: line.product_id,
                        variant_id: line.variant_id,
                        store_id: request.store_id,
                    },
                    line.quantity,
                )
            })
            .collect();
        self.ledger.reserve_all(order_id.0, &reservation_lines, now)?;

        let order_number =
            OrderNumber::from_sequence(self.order_sequence.fetch_add(1, Ordering::Relaxed));
        let place = OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            order_number: order_number.clone(),
            customer_id: request.customer_id,
            store_id: request.store_id,
            lines,
            discount: request.discount,
            shipping_fee: request.shipping_fee,
            tax: request.tax,
            payment_method: request.payment_method,
            address: request.address.clone(),
            occurred_at: now,
        });
        let (order, envelopes) = match self.orders.execute(order_id, &place) {
            Ok(result) => result,
            Err(err) => {
                self.release_order_holds(order_id, now);
                return Err(err);
            }
        };
        self.publish(envelopes);

        let totals = order
            .totals()
            .ok_or_else(|| DomainError::invariant("placed order without totals"))?;

        if request.payment_method.requires_authorization() {
            let authorization = self.config.payment_retry.run("authorize_payment", || {
                self.payments
                    .authorize(order_id.0, totals.total, request.payment_method)
            });
            match authorization {
                Ok(AuthorizationResult::Authorized { reference }) => {
                    tracing::info!(%order_id, reference, "payment authorized");
                }
                Ok(AuthorizationResult::Declined { reason }) => {
                    self.abort_placement(order_id, &format!("payment declined: {reason}"), now);
                    return Err(DomainError::validation(format!(
                        "payment declined: {reason}"
                    )));
                }
                Err(err) => {
                    // Gateway outage, not a decline: keep the order pending
                    // and the reservation held so payment can be retried.
                    tracing::error!(%order_id, %err, "payment authorization unreachable, order left pending");
                    return Err(err);
                }
            }
        }

        let confirm = OrderCommand::ConfirmOrder(ConfirmOrder {
            order_id,
            occurred_at: now,
        });
        let (_, envelopes) = self.orders.execute(order_id, &confirm)?;
        self.publish(envelopes);

        self.notifier.notify(
            ctx.account_id(),
            "order confirmed",
            &format!("order {} is confirmed", order_number.as_str()),
        );
        Ok(PlacedOrder {
            order_id,
            order_number,
            total: totals.total,
        })
    }

    // ---- processing and dispatch ----

    /// Store owner starts preparing the order and a courier search begins.
    ///
    /// Returns the first offer, or `None` when no courier is currently
    /// available; the order stays in processing and can be assigned manually.
    pub fn start_processing(
        &self,
        ctx: &CallerContext,
        order_id: OrderId,
        pickup: Location,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<DispatchOffer>> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::StoreOwner, Role::Admin])?;

        self.with_order_lock(order_id, || {
            let command = OrderCommand::StartProcessing(StartProcessing {
                order_id,
                occurred_at: now,
            });
            let (_, envelopes) = self.orders.execute(order_id, &command)?;
            self.publish(envelopes);
            Ok(())
        })?;

        match self.dispatch.request_dispatch(order_id.0, pickup, now) {
            Ok(offer) => {
                self.notify_offer(&offer);
                Ok(Some(offer))
            }
            Err(DomainError::ResourceExhausted(reason)) => {
                tracing::warn!(%order_id, reason, "no courier available, awaiting manual assignment");
                self.notifier.notify(
                    ctx.account_id(),
                    "dispatch pending",
                    "no courier is currently available; assign one manually",
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Courier answers an offer. The responding courier is the caller's own
    /// identity; acceptance commits the order's inventory holds and ships
    /// the order in one critical section.
    pub fn respond_to_offer(
        &self,
        ctx: &CallerContext,
        offer_id: OfferId,
        accept: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<DispatchOutcome> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::Courier])?;
        let courier_id = self.courier_for_caller(ctx)?;

        let outcome = self
            .dispatch
            .respond_to_offer(offer_id, courier_id, accept, now)?;
        match &outcome {
            DispatchOutcome::Accepted { order_id, .. } => {
                if let Err(err) = self.ship(OrderId::new(*order_id), courier_id, now) {
                    // The order moved (e.g. was cancelled) while the offer
                    // was open; hand the courier back.
                    let _ = self.dispatch.release_courier(courier_id, now);
                    return Err(err);
                }
            }
            DispatchOutcome::ReOffered { offer } => self.notify_offer(offer),
            DispatchOutcome::Exhausted { .. } => {}
        }
        Ok(outcome)
    }

    /// Manual assignment path for exhausted or urgent dispatches.
    pub fn assign_courier(
        &self,
        ctx: &CallerContext,
        order_id: OrderId,
        courier_id: CourierId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::StoreOwner, Role::Admin])?;

        self.dispatch.assign_manually(order_id.0, courier_id, now)?;
        if let Err(err) = self.ship(order_id, courier_id, now) {
            let _ = self.dispatch.release_courier(courier_id, now);
            return Err(err);
        }
        Ok(())
    }

    /// Resolve timed-out offers. Intended to be driven by a periodic tick.
    pub fn sweep_dispatch(&self, now: DateTime<Utc>) -> Vec<DispatchOutcome> {
        let outcomes = self.dispatch.sweep_expired(now);
        for outcome in &outcomes {
            match outcome {
                DispatchOutcome::ReOffered { offer } => self.notify_offer(offer),
                DispatchOutcome::Exhausted { order_id, rounds } => {
                    tracing::warn!(%order_id, rounds, "dispatch exhausted, awaiting manual assignment");
                }
                DispatchOutcome::Accepted { .. } => {}
            }
        }
        outcomes
    }

    fn ship(&self, order_id: OrderId, courier_id: CourierId, now: DateTime<Utc>) -> DomainResult<()> {
        self.with_order_lock(order_id, || {
            let command = OrderCommand::MarkShipped(MarkShipped {
                order_id,
                courier_id,
                occurred_at: now,
            });
            let (_, envelopes) = self.orders.execute(order_id, &command)?;

            // processing -> shipped is the moment reserved stock becomes a
            // permanent decrement.
            self.commit_order_holds(order_id, now)?;
            self.publish(envelopes);
            Ok(())
        })
    }

    // ---- delivery ----

    /// Courier picked the parcel up and is en route. Only the order's
    /// assigned courier may report this.
    pub fn start_delivery(
        &self,
        ctx: &CallerContext,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::Courier])?;
        let caller_courier = self.courier_for_caller(ctx)?;

        self.with_order_lock(order_id, || {
            let current = self.orders.rehydrate(order_id)?;
            if !current.exists() {
                return Err(DomainError::NotFound);
            }
            if current.courier_id() != Some(caller_courier) {
                return Err(DomainError::Unauthorized);
            }
            let command = OrderCommand::MarkDelivering(MarkDelivering {
                order_id,
                occurred_at: now,
            });
            let (_, envelopes) = self.orders.execute(order_id, &command)?;
            self.publish(envelopes);
            Ok(())
        })
    }

    /// Courier-reported delivery confirmation. Settles loyalty and store
    /// statistics exactly once; a duplicate report returns the original
    /// receipt and changes nothing.
    pub fn confirm_delivery(
        &self,
        ctx: &CallerContext,
        order_id: OrderId,
        proof_of_delivery: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<SettlementReceipt> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::Courier])?;
        let caller_courier = self.courier_for_caller(ctx)?;

        self.with_order_lock(order_id, || {
            let current = self.orders.rehydrate(order_id)?;
            if !current.exists() {
                return Err(DomainError::NotFound);
            }
            if current.courier_id() != Some(caller_courier) {
                return Err(DomainError::Unauthorized);
            }
            if current.status() == OrderStatus::Delivered {
                return self.settle_delivered(&current, now);
            }

            let command = OrderCommand::MarkDelivered(MarkDelivered {
                order_id,
                proof_of_delivery: proof_of_delivery.clone(),
                occurred_at: now,
            });
            let (order, envelopes) = self.orders.execute(order_id, &command)?;
            self.publish(envelopes);

            if order.payment_method().requires_authorization() {
                // The authorization was taken at placement; capture failure
                // leaves a pending action, not an undelivered order.
                if let Err(err) = self.config.payment_retry.run("capture_payment", || {
                    let total = order
                        .totals()
                        .ok_or_else(|| DomainError::invariant("order without totals"))?;
                    self.payments.capture(order_id.0, total.total)
                }) {
                    tracing::error!(%order_id, %err, "payment capture failed after delivery");
                }
            }

            if let Some(courier_id) = order.courier_id() {
                let _ = self.dispatch.release_courier(courier_id, now);
            }
            self.settle_delivered(&order, now)
        })
    }

    fn settle_delivered(&self, order: &Order, now: DateTime<Utc>) -> DomainResult<SettlementReceipt> {
        let totals = order
            .totals()
            .ok_or_else(|| DomainError::invariant("order without totals"))?;
        let customer_id = order
            .customer_id()
            .ok_or_else(|| DomainError::invariant("order without customer"))?;
        let store_id = order
            .store_id()
            .ok_or_else(|| DomainError::invariant("order without store"))?;
        let outcome = self.settlement.settle_delivery(
            order.id_typed().0,
            customer_id,
            store_id,
            totals.total,
            now,
        )?;
        Ok(outcome.receipt().clone())
    }

    // ---- cancellation and returns ----

    /// Cancel an order. Compensation depends on how far fulfillment got:
    /// open holds are released, committed stock is restocked, an assigned
    /// courier is freed, and authorized/captured payments are refunded.
    pub fn cancel_order(
        &self,
        ctx: &CallerContext,
        order_id: OrderId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::Customer, Role::StoreOwner, Role::Admin])?;
        let reason = reason.into();

        self.with_order_lock(order_id, || {
            let before = self.orders.rehydrate(order_id)?;
            let command = OrderCommand::CancelOrder(CancelOrder {
                order_id,
                reason: reason.clone(),
                occurred_at: now,
            });
            let (order, envelopes) = self.orders.execute(order_id, &command)?;

            let inventory_was_committed = envelopes.iter().any(|e| {
                matches!(
                    e.payload(),
                    OrderEvent::OrderCancelled(c) if c.inventory_was_committed
                )
            });
            if inventory_was_committed {
                self.restock_lines(&order, AdjustReason::OrderCancelled { order_id: order_id.0 }, now);
            } else {
                self.release_order_holds(order_id, now);
            }

            if let Some(courier_id) = before.courier_id() {
                let _ = self.dispatch.release_courier(courier_id, now);
            }
            if matches!(
                before.payment_status(),
                PaymentStatus::Authorized | PaymentStatus::Captured
            ) {
                self.refund(&order, now);
            }

            self.publish(envelopes);
            self.notifier.notify(
                ctx.account_id(),
                "order cancelled",
                &format!("order {order_id} cancelled: {reason}"),
            );
            Ok(())
        })
    }

    /// Return a delivered order within the configured window. Reverses the
    /// loyalty accrual, restocks the lines, and refunds the payment.
    pub fn return_order(
        &self,
        ctx: &CallerContext,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> DomainResult<SettlementReceipt> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::Customer, Role::Admin])?;

        self.with_order_lock(order_id, || {
            let command = OrderCommand::ReturnOrder(ReturnOrder {
                order_id,
                return_window_days: self.config.return_window_days,
                occurred_at: now,
            });
            let (order, envelopes) = self.orders.execute(order_id, &command)?;

            self.restock_lines(&order, AdjustReason::OrderReturned { order_id: order_id.0 }, now);
            self.refund(&order, now);
            self.publish(envelopes);

            let customer_id = order
                .customer_id()
                .ok_or_else(|| DomainError::invariant("order without customer"))?;
            let store_id = order
                .store_id()
                .ok_or_else(|| DomainError::invariant("order without store"))?;
            let outcome =
                self.settlement
                    .settle_return(order_id.0, customer_id, store_id, now)?;
            Ok(outcome.receipt().clone())
        })
    }

    // ---- inventory ----

    /// Seed or replace a stock record.
    pub fn stock_item(
        &self,
        ctx: &CallerContext,
        key: StockKey,
        record: StockRecord,
    ) -> DomainResult<()> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::StoreOwner, Role::Admin])?;
        self.ledger.stock_item(key, record)
    }

    /// Manual stock correction (recount, damage, shrinkage).
    pub fn adjust_stock(
        &self,
        ctx: &CallerContext,
        key: StockKey,
        delta: i64,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::StoreOwner, Role::Admin])?;
        let events = self
            .ledger
            .adjust(key, delta, AdjustReason::Manual { note: note.into() }, now)?;
        self.report_stock_events(&events);
        Ok(())
    }

    // ---- courier presence ----

    pub fn register_courier(
        &self,
        ctx: &CallerContext,
        courier_id: CourierId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::Courier, Role::Admin])?;
        self.ensure_courier_binding(ctx, courier_id)?;
        self.dispatch.register_courier(courier_id, now)
    }

    pub fn set_courier_availability(
        &self,
        ctx: &CallerContext,
        courier_id: CourierId,
        availability: Availability,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::Courier, Role::Admin])?;
        self.ensure_courier_binding(ctx, courier_id)?;
        self.dispatch.set_availability(courier_id, availability, now)
    }

    /// Couriers report their own position; the id comes from the caller's
    /// profile.
    pub fn update_courier_location(
        &self,
        ctx: &CallerContext,
        location: Location,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active(ctx)?;
        ctx.require_role(&[Role::Courier])?;
        let courier_id = self.courier_for_caller(ctx)?;
        self.dispatch.update_location(courier_id, location, now)
    }

    // ---- queries ----

    pub fn order(&self, order_id: OrderId) -> DomainResult<Order> {
        let order = self.orders.rehydrate(order_id)?;
        if !order.exists() {
            return Err(DomainError::NotFound);
        }
        Ok(order)
    }

    pub fn stock(&self, key: &StockKey) -> Option<StockRecord> {
        self.ledger.stock(key)
    }

    pub fn courier(&self, courier_id: CourierId) -> Option<CourierPresence> {
        self.dispatch.courier(courier_id)
    }

    pub fn offers_for(&self, order_id: OrderId) -> Vec<DispatchOffer> {
        self.dispatch.offers_for(order_id.0)
    }

    pub fn loyalty_account(&self, customer_id: CustomerId) -> Option<LoyaltyAccount> {
        self.settlement.account(customer_id)
    }

    pub fn store_statistics(&self, store_id: StoreId) -> StoreStatistics {
        self.settlement.statistics(store_id)
    }

    // ---- internals ----

    fn with_order_lock<T>(
        &self,
        order_id: OrderId,
        f: impl FnOnce() -> DomainResult<T>,
    ) -> DomainResult<T> {
        let lock = {
            let mut locks = self.order_locks.lock().map_err(|_| poisoned())?;
            locks
                .entry(order_id.0)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().map_err(|_| poisoned())?;
        f()
    }

    fn commit_order_holds(&self, order_id: OrderId, now: DateTime<Utc>) -> DomainResult<()> {
        for hold in self.ledger.holds_for_order(order_id.0) {
            if hold.state == HoldState::Open {
                let events = self.ledger.commit(hold.hold_id, now)?;
                self.report_stock_events(&events);
            }
        }
        Ok(())
    }

    fn release_order_holds(&self, order_id: OrderId, now: DateTime<Utc>) {
        for hold in self.ledger.holds_for_order(order_id.0) {
            if let Err(err) = self.ledger.release(hold.hold_id, now) {
                tracing::error!(%order_id, hold_id = %hold.hold_id, %err, "hold release failed");
            }
        }
    }

    fn restock_lines(&self, order: &Order, reason: AdjustReason, now: DateTime<Utc>) {
        let Some(store_id) = order.store_id() else {
            return;
        };
        for line in order.lines() {
            let key = StockKey {
                product_id: line.product_id,
                variant_id: line.variant_id,
                store_id,
            };
            match self
                .ledger
                .adjust(key, i64::from(line.quantity), reason.clone(), now)
            {
                Ok(events) => self.report_stock_events(&events),
                Err(err) => {
                    tracing::error!(order_id = %order.id_typed(), %err, "restock failed")
                }
            }
        }
    }

    fn refund(&self, order: &Order, _now: DateTime<Utc>) {
        let Some(totals) = order.totals() else {
            return;
        };
        if let Err(err) = self.config.payment_retry.run("refund_payment", || {
            self.payments.refund(order.id_typed().0, totals.total)
        }) {
            tracing::error!(order_id = %order.id_typed(), %err, "refund failed");
        }
    }

    /// Cancel a freshly placed order whose payment fell through, releasing
    /// its reservation.
    fn abort_placement(&self, order_id: OrderId, reason: &str, now: DateTime<Utc>) {
        self.release_order_holds(order_id, now);
        let command = OrderCommand::CancelOrder(CancelOrder {
            order_id,
            reason: reason.to_string(),
            occurred_at: now,
        });
        match self.orders.execute(order_id, &command) {
            Ok((_, envelopes)) => self.publish(envelopes),
            Err(err) => tracing::error!(%order_id, %err, "placement abort failed"),
        }
    }

    fn publish(&self, envelopes: Vec<EventEnvelope<OrderEvent>>) {
        for envelope in envelopes {
            if let Err(err) = self.bus.publish(envelope) {
                // Events are already appended; the bus is at-least-once and
                // consumers are idempotent, so losing a publish is loggable.
                tracing::warn!(?err, "event publish failed");
            }
        }
    }

    /// Surface ledger facts: low-stock crossings are logged and pushed to
    /// the owning store's account.
    fn report_stock_events(&self, events: &[InventoryEvent]) {
        for event in events {
            if let InventoryEvent::LowStockDetected {
                key,
                available,
                threshold,
                ..
            } = event
            {
                tracing::warn!(?key, available, threshold, "stock is low, reorder suggested");
                if let Some(owner) = self.store_owner_account(key.store_id) {
                    self.notifier.notify(
                        owner,
                        "low stock",
                        &format!(
                            "product {} is down to {available} (threshold {threshold})",
                            key.product_id
                        ),
                    );
                }
            }
        }
    }

    fn notify_offer(&self, offer: &DispatchOffer) {
        if let Some(account) = self.courier_account(offer.courier_id) {
            self.notifier.notify(
                account,
                "dispatch offer",
                &format!(
                    "pickup offer for order {}, expires {}",
                    offer.order_id, offer.expires_at
                ),
            );
        }
    }
}

fn poisoned() -> DomainError {
    DomainError::invariant("orchestrator lock poisoned")
}
