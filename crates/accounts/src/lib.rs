//! `swiftmart-accounts` — platform accounts and role profiles.
//!
//! One account carries exactly one role, modeled as a tagged union rather
//! than polymorphic references: the `Account` entity holds a `RoleProfile`
//! variant matching its `Role` discriminant.

pub mod account;

pub use account::{
    Account, AdminProfile, CourierProfile, CustomerProfile, RoleProfile, StoreOwnerProfile,
    VerificationStatus,
};
