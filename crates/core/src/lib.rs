//! `swiftmart-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod context;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use context::{CallerContext, Role};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, AggregateId, CourierId, CustomerId, ProductId, StoreId, VariantId};
pub use money::Money;
pub use value_object::ValueObject;
