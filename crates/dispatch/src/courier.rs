use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swiftmart_core::CourierId;

/// A flat coordinate pair. Distance is plain Euclidean; route optimization
/// and geofencing are out of scope.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn distance_to(&self, other: &Location) -> f64 {
        let dx = self.lat - other.lat;
        let dy = self.lng - other.lng;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Courier availability as the dispatch engine sees it.
///
/// The courier sets `Offline`/`Available`/`OnBreak`; the engine flips
/// `Available`/`Busy` around offer acceptance and delivery completion.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Offline,
    Available,
    Busy,
    OnBreak,
}

/// Live state of one courier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierPresence {
    pub courier_id: CourierId,
    pub availability: Availability,
    pub location: Option<Location>,
    pub active_orders: u32,
    pub updated_at: DateTime<Utc>,
}

impl CourierPresence {
    pub fn new(courier_id: CourierId, now: DateTime<Utc>) -> Self {
        Self {
            courier_id,
            availability: Availability::Offline,
            location: None,
            active_orders: 0,
            updated_at: now,
        }
    }

    /// Whether this courier can be offered another order.
    pub fn can_take_order(&self, max_active_orders: u32) -> bool {
        self.availability == Availability::Available
            && self.location.is_some()
            && self.active_orders < max_active_orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = Location::new(0.0, 0.0);
        let b = Location::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn offline_or_unlocated_couriers_cannot_take_orders() {
        let mut presence = CourierPresence::new(CourierId::new(), Utc::now());
        assert!(!presence.can_take_order(1));

        presence.availability = Availability::Available;
        assert!(!presence.can_take_order(1)); // no location yet

        presence.location = Some(Location::new(1.0, 1.0));
        assert!(presence.can_take_order(1));

        presence.active_orders = 1;
        assert!(!presence.can_take_order(1));
    }
}
