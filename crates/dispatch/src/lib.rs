//! `swiftmart-dispatch` — the courier dispatch engine.
//!
//! Finds and commits exactly one courier per order through a time-boxed
//! offer/accept/reject protocol. Offer expiry runs through the same
//! resolution path as an explicit rejection; it is a scheduled cancellation
//! (`sweep_expired`), never a blocking wait.

pub mod courier;
pub mod engine;
pub mod offer;

pub use courier::{Availability, CourierPresence, Location};
pub use engine::{DispatchConfig, DispatchEngine, DispatchOutcome};
pub use offer::{DispatchOffer, OfferId, OfferResponse};
