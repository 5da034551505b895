//! Loyalty tiers and earning constants.
//!
//! Thresholds and rates live here and nowhere else; every other module
//! computes from these.

use serde::{Deserialize, Serialize};

use swiftmart_core::Money;

/// Points earned per minor currency unit of order total.
pub const DEFAULT_POINTS_PER_CURRENCY: f64 = 0.01;

/// Loyalty level derived from the cumulative points balance. Never stored;
/// always recomputed from the balance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoyaltyTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl LoyaltyTier {
    pub fn for_points(points: u64) -> Self {
        match points {
            0..=999 => Self::Bronze,
            1_000..=4_999 => Self::Silver,
            5_000..=9_999 => Self::Gold,
            _ => Self::Platinum,
        }
    }

    /// Checkout discount granted by the tier, in basis points.
    pub fn discount_bps(self) -> u32 {
        match self {
            Self::Bronze => 0,
            Self::Silver => 200,
            Self::Gold => 500,
            Self::Platinum => 800,
        }
    }
}

impl core::fmt::Display for LoyaltyTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        };
        f.write_str(name)
    }
}

/// Points earned for an order: floor(total × rate).
pub fn points_for_total(total: Money, points_per_currency: f64) -> u64 {
    (total.minor() as f64 * points_per_currency).floor() as u64
}
