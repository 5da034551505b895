//! `swiftmart-orders` — the order aggregate.
//!
//! The order owns its own state machine; status only moves through the
//! transition operations here, and only the fulfillment orchestrator invokes
//! them.

pub mod order;
pub mod status;

pub use order::{
    CancelOrder, ConfirmOrder, DeliveryAddress, MarkDelivered, MarkDelivering, MarkShipped, Order,
    OrderCommand, OrderEvent, OrderId, OrderLine, OrderNumber, PaymentMethod, PaymentStatus,
    PlaceOrder, ReturnOrder, StartProcessing, StatusChange, Totals,
};
pub use status::OrderStatus;
