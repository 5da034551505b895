//! Explicit caller context.
//!
//! Caller identity and role are passed as parameters through the call chain
//! rather than held in ambient/request-scoped state. Every orchestrator-facing
//! operation takes a `CallerContext` so authorization decisions are local and
//! testable.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::AccountId;

/// Role of a platform account. One account carries exactly one role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    StoreOwner,
    Courier,
    Admin,
}

/// Identity + role of the caller performing an operation.
///
/// This is immutable and must be present for all state-mutating entry points.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    account_id: AccountId,
    role: Role,
}

impl CallerContext {
    pub fn new(account_id: AccountId, role: Role) -> Self {
        Self { account_id, role }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Require the caller to hold one of the given roles.
    pub fn require_role(&self, allowed: &[Role]) -> DomainResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(DomainError::Unauthorized)
        }
    }
}
