//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts, exhausted resources). Infrastructure concerns belong
/// elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input). Rejected before
    /// touching state.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated. Bug-class: the operation is aborted,
    /// never silently corrected.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// The operation is invalid given current state (stale version, resolved
    /// offer, terminal order status).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A business resource ran out (insufficient stock, no courier accepted).
    /// Recoverable at the business level, not a system fault.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An external collaborator failed (payment gateway, notification
    /// channel). Transient failures are retried; persistent ones surface as
    /// a pending action.
    #[error("dependency failure: {0}")]
    Dependency(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Whether retrying the same operation could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Dependency(_))
    }
}
