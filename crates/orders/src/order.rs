use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use swiftmart_core::{
    Aggregate, AggregateId, AggregateRoot, CourierId, CustomerId, DomainError, DomainResult, Money,
    ProductId, StoreId, VariantId,
};
use swiftmart_events::Event;

use crate::status::OrderStatus;

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Human-readable, unique order number (`SM-` prefix + zero-padded sequence).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("SM-{seq:06}"))
    }

    pub fn parse(s: impl Into<String>) -> DomainResult<Self> {
        let s = s.into();
        let digits = s
            .strip_prefix("SM-")
            .ok_or_else(|| DomainError::validation("order number must start with 'SM-'"))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(
                "order number must be 'SM-' followed by digits",
            ));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payment method chosen at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card,
    Wallet,
}

impl PaymentMethod {
    /// Cash is settled at the door; everything else needs an authorization
    /// before the order confirms.
    pub fn requires_authorization(self) -> bool {
        !matches!(self, PaymentMethod::CashOnDelivery)
    }
}

/// Payment state as observed by the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    Refunded,
}

/// Order line: product/variant, quantity, unit price snapshot.
///
/// The unit price is snapshotted from the catalog at placement time and never
/// re-read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn line_total(&self) -> DomainResult<Money> {
        self.unit_price.times(self.quantity)
    }
}

/// Financial breakdown of an order.
///
/// Always recomputed from the lines, never trusted from the client:
/// `total = subtotal - discount + shipping_fee + tax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub discount: Money,
    pub shipping_fee: Money,
    pub tax: Money,
    pub total: Money,
}

impl Totals {
    pub fn compute(
        lines: &[OrderLine],
        discount: Money,
        shipping_fee: Money,
        tax: Money,
    ) -> DomainResult<Totals> {
        let mut subtotal = Money::ZERO;
        for line in lines {
            subtotal = subtotal.add(line.line_total()?)?;
        }
        if discount > subtotal {
            return Err(DomainError::validation("discount exceeds subtotal"));
        }
        let total = subtotal.sub(discount)?.add(shipping_fee)?.add(tax)?;
        Ok(Totals {
            subtotal,
            discount,
            shipping_fee,
            tax,
            total,
        })
    }
}

/// Delivery address snapshot taken at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub recipient: String,
    pub street: String,
    pub city: String,
    pub notes: Option<String>,
}

/// One recorded status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    order_number: Option<OrderNumber>,
    customer_id: Option<CustomerId>,
    store_id: Option<StoreId>,
    lines: Vec<OrderLine>,
    totals: Option<Totals>,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    address: Option<DeliveryAddress>,
    courier_id: Option<CourierId>,
    status: OrderStatus,
    history: Vec<StatusChange>,
    delivered_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            order_number: None,
            customer_id: None,
            store_id: None,
            lines: Vec::new(),
            totals: None,
            payment_method: PaymentMethod::CashOnDelivery,
            payment_status: PaymentStatus::Pending,
            address: None,
            courier_id: None,
            status: OrderStatus::Pending,
            history: Vec::new(),
            delivered_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn order_number(&self) -> Option<&OrderNumber> {
        self.order_number.as_ref()
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn store_id(&self) -> Option<StoreId> {
        self.store_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn totals(&self) -> Option<Totals> {
        self.totals
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn address(&self) -> Option<&DeliveryAddress> {
        self.address.as_ref()
    }

    pub fn courier_id(&self) -> Option<CourierId> {
        self.courier_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder (validated cart from the checkout collaborator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub store_id: StoreId,
    pub lines: Vec<OrderLine>,
    pub discount: Money,
    pub shipping_fee: Money,
    pub tax: Money,
    pub payment_method: PaymentMethod,
    pub address: DeliveryAddress,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder (reservation held, payment authorized or COD accepted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartProcessing (store owner begins preparing items).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProcessing {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkShipped (a courier holds an accepted dispatch offer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkShipped {
    pub order_id: OrderId,
    pub courier_id: CourierId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDelivering (courier picked up and is en route).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelivering {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDelivered (courier-reported confirmation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelivered {
    pub order_id: OrderId,
    pub proof_of_delivery: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnOrder (only from delivered, within the window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOrder {
    pub order_id: OrderId,
    pub return_window_days: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    ConfirmOrder(ConfirmOrder),
    StartProcessing(StartProcessing),
    MarkShipped(MarkShipped),
    MarkDelivering(MarkDelivering),
    MarkDelivered(MarkDelivered),
    CancelOrder(CancelOrder),
    ReturnOrder(ReturnOrder),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub store_id: StoreId,
    pub lines: Vec<OrderLine>,
    pub totals: Totals,
    pub payment_method: PaymentMethod,
    pub address: DeliveryAddress,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcessingStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStarted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: OrderId,
    pub courier_id: CourierId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStarted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_id: OrderId,
    pub proof_of_delivery: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub reason: String,
    /// Whether inventory had already been committed when the cancel landed
    /// (drives restock vs hold release in the orchestrator).
    pub inventory_was_committed: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReturned {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderConfirmed(OrderConfirmed),
    ProcessingStarted(ProcessingStarted),
    OrderShipped(OrderShipped),
    DeliveryStarted(DeliveryStarted),
    OrderDelivered(OrderDelivered),
    OrderCancelled(OrderCancelled),
    OrderReturned(OrderReturned),
}

impl swiftmart_events::Command for OrderCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let order_id = match self {
            OrderCommand::PlaceOrder(c) => c.order_id,
            OrderCommand::ConfirmOrder(c) => c.order_id,
            OrderCommand::StartProcessing(c) => c.order_id,
            OrderCommand::MarkShipped(c) => c.order_id,
            OrderCommand::MarkDelivering(c) => c.order_id,
            OrderCommand::MarkDelivered(c) => c.order_id,
            OrderCommand::CancelOrder(c) => c.order_id,
            OrderCommand::ReturnOrder(c) => c.order_id,
        };
        order_id.0
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "order.placed",
            OrderEvent::OrderConfirmed(_) => "order.confirmed",
            OrderEvent::ProcessingStarted(_) => "order.processing_started",
            OrderEvent::OrderShipped(_) => "order.shipped",
            OrderEvent::DeliveryStarted(_) => "order.delivery_started",
            OrderEvent::OrderDelivered(_) => "order.delivered",
            OrderEvent::OrderCancelled(_) => "order.cancelled",
            OrderEvent::OrderReturned(_) => "order.returned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderConfirmed(e) => e.occurred_at,
            OrderEvent::ProcessingStarted(e) => e.occurred_at,
            OrderEvent::OrderShipped(e) => e.occurred_at,
            OrderEvent::DeliveryStarted(e) => e.occurred_at,
            OrderEvent::OrderDelivered(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
            OrderEvent::OrderReturned(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.order_number = Some(e.order_number.clone());
                self.customer_id = Some(e.customer_id);
                self.store_id = Some(e.store_id);
                self.lines = e.lines.clone();
                self.totals = Some(e.totals);
                self.payment_method = e.payment_method;
                self.payment_status = PaymentStatus::Pending;
                self.address = Some(e.address.clone());
                self.created = true;
                self.set_status(OrderStatus::Pending, e.occurred_at);
            }
            OrderEvent::OrderConfirmed(e) => {
                if self.payment_method.requires_authorization() {
                    self.payment_status = PaymentStatus::Authorized;
                }
                self.set_status(OrderStatus::Confirmed, e.occurred_at);
            }
            OrderEvent::ProcessingStarted(e) => {
                self.set_status(OrderStatus::Processing, e.occurred_at);
            }
            OrderEvent::OrderShipped(e) => {
                self.courier_id = Some(e.courier_id);
                self.set_status(OrderStatus::Shipped, e.occurred_at);
            }
            OrderEvent::DeliveryStarted(e) => {
                self.set_status(OrderStatus::Delivering, e.occurred_at);
            }
            OrderEvent::OrderDelivered(e) => {
                self.payment_status = PaymentStatus::Captured;
                self.delivered_at = Some(e.occurred_at);
                self.set_status(OrderStatus::Delivered, e.occurred_at);
            }
            OrderEvent::OrderCancelled(e) => {
                if matches!(
                    self.payment_status,
                    PaymentStatus::Authorized | PaymentStatus::Captured
                ) {
                    self.payment_status = PaymentStatus::Refunded;
                }
                self.set_status(OrderStatus::Cancelled, e.occurred_at);
            }
            OrderEvent::OrderReturned(e) => {
                self.payment_status = PaymentStatus::Refunded;
                self.set_status(OrderStatus::Returned, e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            OrderCommand::StartProcessing(cmd) => self.handle_start_processing(cmd),
            OrderCommand::MarkShipped(cmd) => self.handle_mark_shipped(cmd),
            OrderCommand::MarkDelivering(cmd) => self.handle_mark_delivering(cmd),
            OrderCommand::MarkDelivered(cmd) => self.handle_mark_delivered(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            OrderCommand::ReturnOrder(cmd) => self.handle_return(cmd),
        }
    }
}

impl Order {
    fn set_status(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        self.history.push(StatusChange {
            status,
            occurred_at: at,
        });
    }

    fn ensure_exists(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: OrderId) -> DomainResult<()> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    /// Guard for every status-advancing command. Invalid transitions are
    /// conflicts: the caller raced another actor and lost.
    fn ensure_transition(&self, next: OrderStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::conflict(format!(
                "invalid transition: {} -> {next}",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> DomainResult<Vec<OrderEvent>> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order must have at least one line"));
        }
        for line in &cmd.lines {
            if line.quantity == 0 {
                return Err(DomainError::validation("line quantity must be positive"));
            }
            if line.unit_price.is_zero() {
                return Err(DomainError::validation("unit price must be positive"));
            }
        }
        if cmd.address.recipient.trim().is_empty() || cmd.address.street.trim().is_empty() {
            return Err(DomainError::validation("delivery address is incomplete"));
        }

        // Totals are recomputed here; a client-supplied total never enters
        // the aggregate.
        let totals = Totals::compute(&cmd.lines, cmd.discount, cmd.shipping_fee, cmd.tax)?;

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            customer_id: cmd.customer_id,
            store_id: cmd.store_id,
            lines: cmd.lines.clone(),
            totals,
            payment_method: cmd.payment_method,
            address: cmd.address.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_exists()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Confirmed)?;

        Ok(vec![OrderEvent::OrderConfirmed(OrderConfirmed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_processing(&self, cmd: &StartProcessing) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_exists()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Processing)?;

        Ok(vec![OrderEvent::ProcessingStarted(ProcessingStarted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_shipped(&self, cmd: &MarkShipped) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_exists()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Shipped)?;

        Ok(vec![OrderEvent::OrderShipped(OrderShipped {
            order_id: cmd.order_id,
            courier_id: cmd.courier_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_delivering(&self, cmd: &MarkDelivering) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_exists()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Delivering)?;

        Ok(vec![OrderEvent::DeliveryStarted(DeliveryStarted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_delivered(&self, cmd: &MarkDelivered) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_exists()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Delivered)?;
        if self.courier_id.is_none() {
            return Err(DomainError::invariant(
                "order cannot be delivered without an assigned courier",
            ));
        }

        Ok(vec![OrderEvent::OrderDelivered(OrderDelivered {
            order_id: cmd.order_id,
            proof_of_delivery: cmd.proof_of_delivery.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_exists()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Cancelled)?;

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            inventory_was_committed: self.status.inventory_committed(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnOrder) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_exists()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Returned)?;

        let delivered_at = self
            .delivered_at
            .ok_or_else(|| DomainError::invariant("delivered order without delivered_at"))?;
        let window = Duration::days(cmd.return_window_days);
        if cmd.occurred_at - delivered_at > window {
            return Err(DomainError::conflict(format!(
                "return window of {} days has closed",
                cmd.return_window_days
            )));
        }

        Ok(vec![OrderEvent::OrderReturned(OrderReturned {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swiftmart_events::execute;

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn test_line(quantity: u32, unit_price: u64) -> OrderLine {
        OrderLine {
            product_id: ProductId::new(),
            variant_id: None,
            quantity,
            unit_price: Money::from_minor(unit_price),
        }
    }

    fn test_address() -> DeliveryAddress {
        DeliveryAddress {
            recipient: "A. Customer".to_string(),
            street: "1 Market Way".to_string(),
            city: "Springfield".to_string(),
            notes: None,
        }
    }

    fn place_cmd(order_id: OrderId, method: PaymentMethod) -> PlaceOrder {
        PlaceOrder {
            order_id,
            order_number: OrderNumber::from_sequence(42),
            customer_id: CustomerId::new(),
            store_id: StoreId::new(),
            lines: vec![test_line(2, 1_000), test_line(1, 500)],
            discount: Money::from_minor(100),
            shipping_fee: Money::from_minor(300),
            tax: Money::from_minor(50),
            payment_method: method,
            address: test_address(),
            occurred_at: Utc::now(),
        }
    }

    fn placed_order(method: PaymentMethod) -> Order {
        let order_id = test_order_id();
        let mut order = Order::empty(order_id);
        execute(
            &mut order,
            &OrderCommand::PlaceOrder(place_cmd(order_id, method)),
        )
        .unwrap();
        order
    }

    fn advance_to(order: &mut Order, target: OrderStatus) {
        let order_id = order.id_typed();
        let steps: [(OrderStatus, OrderCommand); 5] = [
            (
                OrderStatus::Confirmed,
                OrderCommand::ConfirmOrder(ConfirmOrder {
                    order_id,
                    occurred_at: Utc::now(),
                }),
            ),
            (
                OrderStatus::Processing,
                OrderCommand::StartProcessing(StartProcessing {
                    order_id,
                    occurred_at: Utc::now(),
                }),
            ),
            (
                OrderStatus::Shipped,
                OrderCommand::MarkShipped(MarkShipped {
                    order_id,
                    courier_id: CourierId::new(),
                    occurred_at: Utc::now(),
                }),
            ),
            (
                OrderStatus::Delivering,
                OrderCommand::MarkDelivering(MarkDelivering {
                    order_id,
                    occurred_at: Utc::now(),
                }),
            ),
            (
                OrderStatus::Delivered,
                OrderCommand::MarkDelivered(MarkDelivered {
                    order_id,
                    proof_of_delivery: Some("sig-ref-1".to_string()),
                    occurred_at: Utc::now(),
                }),
            ),
        ];
        for (status, cmd) in steps {
            if order.status() == target {
                return;
            }
            if !order.status().can_transition_to(status) {
                continue;
            }
            execute(order, &cmd).unwrap();
            assert_eq!(order.status(), status);
        }
        assert_eq!(order.status(), target);
    }

    #[test]
    fn totals_are_recomputed_from_lines() {
        let order = placed_order(PaymentMethod::Card);
        let totals = order.totals().unwrap();
        // subtotal = 2*1000 + 1*500 = 2500
        assert_eq!(totals.subtotal, Money::from_minor(2_500));
        // total = 2500 - 100 + 300 + 50
        assert_eq!(totals.total, Money::from_minor(2_750));
    }

    #[test]
    fn discount_larger_than_subtotal_is_rejected() {
        let order_id = test_order_id();
        let order = Order::empty(order_id);
        let mut cmd = place_cmd(order_id, PaymentMethod::Card);
        cmd.discount = Money::from_minor(1_000_000);
        let err = order.handle(&OrderCommand::PlaceOrder(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn full_success_path_reaches_delivered() {
        let mut order = placed_order(PaymentMethod::Card);
        advance_to(&mut order, OrderStatus::Delivered);

        assert_eq!(order.status(), OrderStatus::Delivered);
        assert_eq!(order.payment_status(), PaymentStatus::Captured);
        assert!(order.courier_id().is_some());
        assert!(order.delivered_at().is_some());
        // Pending, Confirmed, Processing, Shipped, Delivering, Delivered.
        assert_eq!(order.history().len(), 6);
    }

    #[test]
    fn invalid_transition_is_conflict_and_leaves_status_unchanged() {
        let mut order = placed_order(PaymentMethod::Card);
        advance_to(&mut order, OrderStatus::Delivered);

        let err = order
            .handle(&OrderCommand::StartProcessing(StartProcessing {
                order_id: order.id_typed(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(order.status(), OrderStatus::Delivered);
    }

    #[test]
    fn ship_requires_processing_state() {
        let order = placed_order(PaymentMethod::Card);
        let err = order
            .handle(&OrderCommand::MarkShipped(MarkShipped {
                order_id: order.id_typed(),
                courier_id: CourierId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn cancel_before_ship_records_open_inventory() {
        let mut order = placed_order(PaymentMethod::Card);
        advance_to(&mut order, OrderStatus::Processing);

        let events = order
            .handle(&OrderCommand::CancelOrder(CancelOrder {
                order_id: order.id_typed(),
                reason: "customer changed mind".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        match &events[0] {
            OrderEvent::OrderCancelled(e) => assert!(!e.inventory_was_committed),
            other => panic!("expected OrderCancelled, got {other:?}"),
        }
    }

    #[test]
    fn cancel_after_ship_records_committed_inventory() {
        let mut order = placed_order(PaymentMethod::Card);
        advance_to(&mut order, OrderStatus::Shipped);

        let events = order
            .handle(&OrderCommand::CancelOrder(CancelOrder {
                order_id: order.id_typed(),
                reason: "address unreachable".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        match &events[0] {
            OrderEvent::OrderCancelled(e) => assert!(e.inventory_was_committed),
            other => panic!("expected OrderCancelled, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_order_refunds_authorized_payment() {
        let mut order = placed_order(PaymentMethod::Card);
        advance_to(&mut order, OrderStatus::Confirmed);
        assert_eq!(order.payment_status(), PaymentStatus::Authorized);

        let order_id = order.id_typed();
        execute(
            &mut order,
            &OrderCommand::CancelOrder(CancelOrder {
                order_id,
                reason: "out of stock".to_string(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn cod_order_stays_payment_pending_until_delivery() {
        let mut order = placed_order(PaymentMethod::CashOnDelivery);
        advance_to(&mut order, OrderStatus::Shipped);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);

        advance_to(&mut order, OrderStatus::Delivered);
        assert_eq!(order.payment_status(), PaymentStatus::Captured);
    }

    #[test]
    fn return_inside_window_succeeds() {
        let mut order = placed_order(PaymentMethod::Card);
        advance_to(&mut order, OrderStatus::Delivered);
        let delivered_at = order.delivered_at().unwrap();

        let order_id = order.id_typed();
        execute(
            &mut order,
            &OrderCommand::ReturnOrder(ReturnOrder {
                order_id,
                return_window_days: 7,
                occurred_at: delivered_at + Duration::days(3),
            }),
        )
        .unwrap();
        assert_eq!(order.status(), OrderStatus::Returned);
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
    }

    #[test]
    fn return_after_window_is_conflict() {
        let mut order = placed_order(PaymentMethod::Card);
        advance_to(&mut order, OrderStatus::Delivered);
        let delivered_at = order.delivered_at().unwrap();

        let err = order
            .handle(&OrderCommand::ReturnOrder(ReturnOrder {
                order_id: order.id_typed(),
                return_window_days: 7,
                occurred_at: delivered_at + Duration::days(8),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(order.status(), OrderStatus::Delivered);
    }

    #[test]
    fn return_is_not_reachable_before_delivery() {
        let mut order = placed_order(PaymentMethod::Card);
        advance_to(&mut order, OrderStatus::Shipped);

        let err = order
            .handle(&OrderCommand::ReturnOrder(ReturnOrder {
                order_id: order.id_typed(),
                return_window_days: 7,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order = placed_order(PaymentMethod::Card);
        let version = order.version();
        let status = order.status();

        let cmd = OrderCommand::ConfirmOrder(ConfirmOrder {
            order_id: order.id_typed(),
            occurred_at: Utc::now(),
        });
        let events1 = order.handle(&cmd).unwrap();
        let events2 = order.handle(&cmd).unwrap();

        assert_eq!(order.version(), version);
        assert_eq!(order.status(), status);
        assert_eq!(events1, events2);
    }

    #[test]
    fn order_number_parsing() {
        assert_eq!(
            OrderNumber::from_sequence(42).as_str(),
            "SM-000042"
        );
        assert!(OrderNumber::parse("SM-000123").is_ok());
        assert!(OrderNumber::parse("XX-000123").is_err());
        assert!(OrderNumber::parse("SM-12a").is_err());
        assert!(OrderNumber::parse("SM-").is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn command_for(choice: u8, order_id: OrderId) -> OrderCommand {
            match choice {
                0 => OrderCommand::ConfirmOrder(ConfirmOrder {
                    order_id,
                    occurred_at: Utc::now(),
                }),
                1 => OrderCommand::StartProcessing(StartProcessing {
                    order_id,
                    occurred_at: Utc::now(),
                }),
                2 => OrderCommand::MarkShipped(MarkShipped {
                    order_id,
                    courier_id: CourierId::new(),
                    occurred_at: Utc::now(),
                }),
                3 => OrderCommand::MarkDelivering(MarkDelivering {
                    order_id,
                    occurred_at: Utc::now(),
                }),
                4 => OrderCommand::MarkDelivered(MarkDelivered {
                    order_id,
                    proof_of_delivery: None,
                    occurred_at: Utc::now(),
                }),
                5 => OrderCommand::CancelOrder(CancelOrder {
                    order_id,
                    reason: "prop".to_string(),
                    occurred_at: Utc::now(),
                }),
                _ => OrderCommand::ReturnOrder(ReturnOrder {
                    order_id,
                    return_window_days: 7,
                    occurred_at: Utc::now(),
                }),
            }
        }

        proptest! {
            /// Whatever command sequence arrives, the recorded status history
            /// only ever walks edges of the transition graph, and rejected
            /// commands leave the status untouched.
            #[test]
            fn history_only_follows_graph_edges(
                choices in proptest::collection::vec(0u8..7, 1..24),
            ) {
                let mut order = placed_order(PaymentMethod::Card);
                let order_id = order.id_typed();

                for choice in choices {
                    let cmd = command_for(choice, order_id);
                    let before = order.status();
                    match execute(&mut order, &cmd) {
                        Ok(_) => prop_assert!(before.can_transition_to(order.status())),
                        Err(_) => prop_assert_eq!(before, order.status()),
                    }
                }

                for pair in order.history().windows(2) {
                    prop_assert!(pair[0].status.can_transition_to(pair[1].status));
                }
            }
        }
    }
}
