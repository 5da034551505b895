//! `swiftmart-orchestrator` — the fulfillment coordination service.
//!
//! Drives an order from placement through inventory commitment, courier
//! dispatch, delivery, and settlement. The orchestrator is the only writer
//! of order status; inventory, dispatch, and loyalty own their own state and
//! are driven from here.

pub mod collaborators;
pub mod config;
pub mod order_store;
pub mod orchestrator;
pub mod retry;

pub use collaborators::{
    AlwaysApprovePayment, AuthorizationResult, Catalog, InMemoryCatalog, LoggingNotifier,
    Notifier, PaymentGateway, RecordingNotifier,
};
pub use config::FulfillmentConfig;
pub use order_store::{OrderStore, ORDER_AGGREGATE_TYPE};
pub use orchestrator::{CartLine, FulfillmentOrchestrator, PlaceOrderRequest, PlacedOrder};
pub use retry::{BackoffStrategy, RetryPolicy};
