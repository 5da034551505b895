use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swiftmart_core::{
    AccountId, CourierId, CustomerId, DomainError, DomainResult, Entity, Role, StoreId,
};

/// Admin-governed verification state for store owners and couriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

/// Customer-facing profile data the fulfillment core cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub customer_id: CustomerId,
    pub default_address: Option<String>,
}

/// Store owner profile; one owner runs one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOwnerProfile {
    pub store_id: StoreId,
    pub verification: VerificationStatus,
}

/// Courier profile; vehicle details stay out of the fulfillment core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierProfile {
    pub courier_id: CourierId,
    pub verification: VerificationStatus,
}

/// Admin profile carries no extra fulfillment-relevant data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminProfile {}

/// Role profile: exactly one per account, discriminated by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleProfile {
    Customer(CustomerProfile),
    StoreOwner(StoreOwnerProfile),
    Courier(CourierProfile),
    Admin(AdminProfile),
}

impl RoleProfile {
    pub fn role(&self) -> Role {
        match self {
            RoleProfile::Customer(_) => Role::Customer,
            RoleProfile::StoreOwner(_) => Role::StoreOwner,
            RoleProfile::Courier(_) => Role::Courier,
            RoleProfile::Admin(_) => Role::Admin,
        }
    }
}

/// Account status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
}

/// Entity: platform account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    profile: RoleProfile,
    status: AccountStatus,
    created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: AccountId, profile: RoleProfile, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            profile,
            status: AccountStatus::Active,
            created_at,
        }
    }

    pub fn role(&self) -> Role {
        self.profile.role()
    }

    pub fn profile(&self) -> &RoleProfile {
        &self.profile
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn suspend(&mut self) {
        self.status = AccountStatus::Suspended;
    }

    pub fn reinstate(&mut self) {
        self.status = AccountStatus::Active;
    }

    /// Admin-driven verification of a store owner or courier profile.
    pub fn set_verification(&mut self, verification: VerificationStatus) -> DomainResult<()> {
        match &mut self.profile {
            RoleProfile::StoreOwner(p) => {
                p.verification = verification;
                Ok(())
            }
            RoleProfile::Courier(p) => {
                p.verification = verification;
                Ok(())
            }
            _ => Err(DomainError::validation(
                "only store owners and couriers carry verification",
            )),
        }
    }

    /// Invariant helper: whether this account is allowed to transact.
    ///
    /// Suspended accounts cannot transact; store owners and couriers must be
    /// verified first.
    pub fn can_transact(&self) -> bool {
        if self.status != AccountStatus::Active {
            return false;
        }
        match &self.profile {
            RoleProfile::StoreOwner(p) => p.verification == VerificationStatus::Verified,
            RoleProfile::Courier(p) => p.verification == VerificationStatus::Verified,
            RoleProfile::Customer(_) | RoleProfile::Admin(_) => true,
        }
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn courier_account() -> Account {
        Account::new(
            AccountId::new(),
            RoleProfile::Courier(CourierProfile {
                courier_id: CourierId::new(),
                verification: VerificationStatus::Pending,
            }),
            Utc::now(),
        )
    }

    #[test]
    fn unverified_courier_cannot_transact() {
        let account = courier_account();
        assert_eq!(account.role(), Role::Courier);
        assert!(!account.can_transact());
    }

    #[test]
    fn verified_courier_can_transact_until_suspended() {
        let mut account = courier_account();
        account
            .set_verification(VerificationStatus::Verified)
            .unwrap();
        assert!(account.can_transact());

        account.suspend();
        assert!(!account.can_transact());

        account.reinstate();
        assert!(account.can_transact());
    }

    #[test]
    fn customers_do_not_carry_verification() {
        let mut account = Account::new(
            AccountId::new(),
            RoleProfile::Customer(CustomerProfile {
                customer_id: CustomerId::new(),
                default_address: None,
            }),
            Utc::now(),
        );
        assert!(account.can_transact());
        let err = account
            .set_verification(VerificationStatus::Verified)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
