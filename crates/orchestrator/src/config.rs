//! Orchestrator configuration.

use swiftmart_dispatch::DispatchConfig;
use swiftmart_loyalty::DEFAULT_POINTS_PER_CURRENCY;

use crate::retry::RetryPolicy;

/// All fulfillment tunables in one place. Constructed once at startup and
/// passed by value; nothing reads configuration ambiently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FulfillmentConfig {
    /// Days after delivery during which a return is accepted.
    pub return_window_days: i64,
    /// Loyalty earn rate applied to the order total.
    pub points_per_currency: f64,
    /// Offer protocol tunables for the dispatch engine.
    pub dispatch: DispatchConfig,
    /// Retry policy for payment gateway calls.
    pub payment_retry: RetryPolicy,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            return_window_days: 7,
            points_per_currency: DEFAULT_POINTS_PER_CURRENCY,
            dispatch: DispatchConfig::default(),
            payment_retry: RetryPolicy::default(),
        }
    }
}
