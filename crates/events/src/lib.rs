//! `swiftmart-events` — event mechanics shared across the fulfillment core.
//!
//! Events are stored first (append-only, per-aggregate stream) and then
//! published on a bus for consumers (settlement, notifications, read models).
//! The bus is at-least-once; consumers must be idempotent.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::InMemoryEventBus;
