use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use swiftmart_core::{AggregateId, CourierId};

/// Identifier of a dispatch offer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(Uuid);

impl OfferId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for OfferId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for OfferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Courier response to an offer. `Pending` is the only unresolved state;
/// resolved offers are immutable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferResponse {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

/// A time-boxed proposal to a specific courier to fulfill a specific order.
///
/// Identity is (order, courier, offer_sequence); `offer_sequence` is 1-based
/// per order. Offers form an append-only history: at most one accepted offer
/// per order, preceded by zero or more rejected/expired ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOffer {
    pub offer_id: OfferId,
    pub order_id: AggregateId,
    pub courier_id: CourierId,
    pub offer_sequence: u32,
    pub offered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub response: OfferResponse,
}

impl DispatchOffer {
    pub fn is_resolved(&self) -> bool {
        self.response != OfferResponse::Pending
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.response == OfferResponse::Pending && now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn pending_offer_expires_after_deadline() {
        let now = Utc::now();
        let offer = DispatchOffer {
            offer_id: OfferId::new(),
            order_id: AggregateId::new(),
            courier_id: CourierId::new(),
            offer_sequence: 1,
            offered_at: now,
            expires_at: now + Duration::seconds(60),
            response: OfferResponse::Pending,
        };

        assert!(!offer.is_expired(now + Duration::seconds(59)));
        assert!(offer.is_expired(now + Duration::seconds(61)));
    }

    #[test]
    fn resolved_offers_never_expire() {
        let now = Utc::now();
        let offer = DispatchOffer {
            offer_id: OfferId::new(),
            order_id: AggregateId::new(),
            courier_id: CourierId::new(),
            offer_sequence: 1,
            offered_at: now,
            expires_at: now,
            response: OfferResponse::Rejected,
        };
        assert!(offer.is_resolved());
        assert!(!offer.is_expired(now + Duration::hours(1)));
    }
}
