//! The dispatch engine service.
//!
//! All engine state lives behind one lock; offers for one order form an
//! append-only history and the engine enforces the single-accepted-offer
//! invariant. Candidate couriers are ranked by straight-line distance to the
//! pickup location.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use swiftmart_core::{AggregateId, CourierId, DomainError, DomainResult};

use crate::courier::{Availability, CourierPresence, Location};
use crate::offer::{DispatchOffer, OfferId, OfferResponse};

/// Tunables for the offer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// How long a courier has to respond to an offer.
    pub offer_ttl_secs: i64,
    /// How many couriers are tried before dispatch is reported failed.
    pub max_rounds: u32,
    /// Active-order ceiling per courier.
    pub max_active_orders: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_ttl_secs: 60,
            max_rounds: 5,
            max_active_orders: 1,
        }
    }
}

/// What happened after an offer was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A courier is committed to the order.
    Accepted {
        order_id: AggregateId,
        courier_id: CourierId,
    },
    /// The previous offer failed; the next candidate now holds one.
    ReOffered { offer: DispatchOffer },
    /// No candidate accepted within the round limit. The order stays in
    /// processing and is raised for manual assignment, never failed outright.
    Exhausted { order_id: AggregateId, rounds: u32 },
}

#[derive(Debug, Default)]
struct EngineState {
    couriers: HashMap<CourierId, CourierPresence>,
    offers: HashMap<AggregateId, Vec<DispatchOffer>>,
    pickups: HashMap<AggregateId, Location>,
}

/// Matches pending orders to available couriers.
#[derive(Debug)]
pub struct DispatchEngine {
    config: DispatchConfig,
    state: RwLock<EngineState>,
}

impl DispatchEngine {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            state: RwLock::new(EngineState::default()),
        }
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Register a courier (starts offline, no location).
    pub fn register_courier(&self, courier_id: CourierId, now: DateTime<Utc>) -> DomainResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state
            .couriers
            .entry(courier_id)
            .or_insert_with(|| CourierPresence::new(courier_id, now));
        Ok(())
    }

    /// Courier-driven availability change. `Busy` is engine-owned and cannot
    /// be set directly.
    pub fn set_availability(
        &self,
        courier_id: CourierId,
        availability: Availability,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if availability == Availability::Busy {
            return Err(DomainError::validation(
                "busy is set by the engine, not the courier",
            ));
        }
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let presence = state
            .couriers
            .get_mut(&courier_id)
            .ok_or(DomainError::NotFound)?;
        presence.availability = availability;
        presence.updated_at = now;
        Ok(())
    }

    /// Cheap, frequent position update; no state-machine interaction.
    pub fn update_location(
        &self,
        courier_id: CourierId,
        location: Location,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let presence = state
            .couriers
            .get_mut(&courier_id)
            .ok_or(DomainError::NotFound)?;
        presence.location = Some(location);
        presence.updated_at = now;
        Ok(())
    }

    pub fn courier(&self, courier_id: CourierId) -> Option<CourierPresence> {
        let state = self.state.read().ok()?;
        state.couriers.get(&courier_id).cloned()
    }

    /// Full offer history for an order (append-only).
    pub fn offers_for(&self, order_id: AggregateId) -> Vec<DispatchOffer> {
        match self.state.read() {
            Ok(state) => state.offers.get(&order_id).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// The accepted offer for an order, if a courier is committed.
    pub fn accepted_offer(&self, order_id: AggregateId) -> Option<DispatchOffer> {
        let state = self.state.read().ok()?;
        state
            .offers
            .get(&order_id)?
            .iter()
            .find(|o| o.response == OfferResponse::Accepted)
            .cloned()
    }

    /// Start the offer cycle for an order: offer to the nearest available
    /// courier with a short expiry.
    pub fn request_dispatch(
        &self,
        order_id: AggregateId,
        pickup: Location,
        now: DateTime<Utc>,
    ) -> DomainResult<DispatchOffer> {
        let mut state = self.state.write().map_err(|_| poisoned())?;

        if let Some(history) = state.offers.get(&order_id) {
            if history.iter().any(|o| !o.is_resolved()) {
                return Err(DomainError::conflict("order already has a pending offer"));
            }
            if history.iter().any(|o| o.response == OfferResponse::Accepted) {
                return Err(DomainError::conflict("order already has a courier"));
            }
        }

        state.pickups.insert(order_id, pickup);
        let courier_id = Self::pick_candidate(&state, order_id, &pickup, self.config.max_active_orders)
            .ok_or_else(|| DomainError::exhausted("no courier available for dispatch"))?;

        Ok(self.push_offer(&mut state, order_id, courier_id, OfferResponse::Pending, now))
    }

    /// Courier response to an offer. Only the offer holder may respond;
    /// responses to a resolved offer are conflicts, never applied. Responses
    /// to an offer past its expiry are conflicts too; expiry resolution
    /// belongs to `sweep_expired`.
    pub fn respond_to_offer(
        &self,
        offer_id: OfferId,
        courier_id: CourierId,
        accept: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<DispatchOutcome> {
        let mut state = self.state.write().map_err(|_| poisoned())?;

        let (order_id, index) = Self::locate_offer(&state, offer_id).ok_or(DomainError::NotFound)?;
        let offer = &state.offers[&order_id][index];

        if offer.courier_id != courier_id {
            return Err(DomainError::Unauthorized);
        }
        if offer.is_resolved() {
            return Err(DomainError::conflict("offer already resolved"));
        }
        if offer.is_expired(now) {
            return Err(DomainError::conflict("offer expired"));
        }

        if accept {
            let already_accepted = state.offers[&order_id]
                .iter()
                .any(|o| o.response == OfferResponse::Accepted);
            if already_accepted {
                // Guarded above by is_resolved; reaching this is a bug.
                return Err(DomainError::invariant(
                    "order already has an accepted offer",
                ));
            }

            Self::resolve(&mut state, order_id, index, OfferResponse::Accepted);
            Self::mark_busy(&mut state, courier_id, now);
            tracing::info!(%order_id, %courier_id, "dispatch offer accepted");
            Ok(DispatchOutcome::Accepted {
                order_id,
                courier_id,
            })
        } else {
            Self::resolve(&mut state, order_id, index, OfferResponse::Rejected);
            tracing::info!(%order_id, %courier_id, "dispatch offer rejected");
            Ok(self.advance_after_failure(&mut state, order_id, now))
        }
    }

    /// Resolve every pending offer past its deadline; expiry takes the same
    /// path as an explicit rejection.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::new();
        let Ok(mut state) = self.state.write() else {
            return outcomes;
        };

        let expired: Vec<(AggregateId, usize)> = state
            .offers
            .iter()
            .flat_map(|(order_id, history)| {
                history
                    .iter()
                    .enumerate()
                    .filter(|(_, o)| o.is_expired(now))
                    .map(|(i, _)| (*order_id, i))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (order_id, index) in expired {
            Self::resolve(&mut state, order_id, index, OfferResponse::Expired);
            tracing::info!(%order_id, "dispatch offer expired");
            outcomes.push(self.advance_after_failure(&mut state, order_id, now));
        }
        outcomes
    }

    /// Admin/store-owner override: commit a specific courier, bypassing
    /// ranking but subject to the single-accepted-offer invariant.
    pub fn assign_manually(
        &self,
        order_id: AggregateId,
        courier_id: CourierId,
        now: DateTime<Utc>,
    ) -> DomainResult<DispatchOffer> {
        let mut state = self.state.write().map_err(|_| poisoned())?;

        if !state.couriers.contains_key(&courier_id) {
            return Err(DomainError::NotFound);
        }
        if let Some(history) = state.offers.get_mut(&order_id) {
            if history.iter().any(|o| o.response == OfferResponse::Accepted) {
                return Err(DomainError::conflict("order already has a courier"));
            }
            // Supersede any still-pending offer.
            for offer in history.iter_mut().filter(|o| !o.is_resolved()) {
                offer.response = OfferResponse::Expired;
            }
        }

        let offer = self.push_offer(&mut state, order_id, courier_id, OfferResponse::Accepted, now);
        Self::mark_busy(&mut state, courier_id, now);
        tracing::info!(%order_id, %courier_id, "courier assigned manually");
        Ok(offer)
    }

    /// Return a courier to the pool after delivery completion or an order
    /// cancellation that releases them.
    pub fn release_courier(&self, courier_id: CourierId, now: DateTime<Utc>) -> DomainResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let presence = state
            .couriers
            .get_mut(&courier_id)
            .ok_or(DomainError::NotFound)?;
        presence.active_orders = presence.active_orders.saturating_sub(1);
        if presence.active_orders == 0 && presence.availability == Availability::Busy {
            presence.availability = Availability::Available;
        }
        presence.updated_at = now;
        Ok(())
    }

    fn push_offer(
        &self,
        state: &mut EngineState,
        order_id: AggregateId,
        courier_id: CourierId,
        response: OfferResponse,
        now: DateTime<Utc>,
    ) -> DispatchOffer {
        let history = state.offers.entry(order_id).or_default();
        let offer = DispatchOffer {
            offer_id: OfferId::new(),
            order_id,
            courier_id,
            offer_sequence: history.len() as u32 + 1,
            offered_at: now,
            expires_at: now + Duration::seconds(self.config.offer_ttl_secs),
            response,
        };
        history.push(offer.clone());
        offer
    }

    /// After a rejection or expiry: offer to the next candidate, or report
    /// exhaustion once the round limit is hit or nobody is left.
    fn advance_after_failure(
        &self,
        state: &mut EngineState,
        order_id: AggregateId,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        let rounds = state.offers.get(&order_id).map(|h| h.len() as u32).unwrap_or(0);
        if rounds >= self.config.max_rounds {
            tracing::warn!(%order_id, rounds, "dispatch exhausted: round limit reached");
            return DispatchOutcome::Exhausted { order_id, rounds };
        }

        let Some(pickup) = state.pickups.get(&order_id).copied() else {
            tracing::warn!(%order_id, "dispatch exhausted: pickup location unknown");
            return DispatchOutcome::Exhausted { order_id, rounds };
        };
        match Self::pick_candidate(state, order_id, &pickup, self.config.max_active_orders) {
            Some(courier_id) => {
                let offer = self.push_offer(state, order_id, courier_id, OfferResponse::Pending, now);
                DispatchOutcome::ReOffered { offer }
            }
            None => {
                tracing::warn!(%order_id, rounds, "dispatch exhausted: no candidates left");
                DispatchOutcome::Exhausted { order_id, rounds }
            }
        }
    }

    /// Nearest available courier that has not already been offered this order.
    fn pick_candidate(
        state: &EngineState,
        order_id: AggregateId,
        pickup: &Location,
        max_active_orders: u32,
    ) -> Option<CourierId> {
        let prior: Vec<CourierId> = state
            .offers
            .get(&order_id)
            .map(|h| h.iter().map(|o| o.courier_id).collect())
            .unwrap_or_default();

        state
            .couriers
            .values()
            .filter(|p| p.can_take_order(max_active_orders))
            .filter(|p| !prior.contains(&p.courier_id))
            .min_by(|a, b| {
                let da = a.location.as_ref().map(|l| l.distance_to(pickup)).unwrap_or(f64::MAX);
                let db = b.location.as_ref().map(|l| l.distance_to(pickup)).unwrap_or(f64::MAX);
                da.total_cmp(&db)
            })
            .map(|p| p.courier_id)
    }

    fn locate_offer(state: &EngineState, offer_id: OfferId) -> Option<(AggregateId, usize)> {
        for (order_id, history) in &state.offers {
            if let Some(index) = history.iter().position(|o| o.offer_id == offer_id) {
                return Some((*order_id, index));
            }
        }
        None
    }

    fn resolve(state: &mut EngineState, order_id: AggregateId, index: usize, response: OfferResponse) {
        if let Some(history) = state.offers.get_mut(&order_id) {
            if let Some(offer) = history.get_mut(index) {
                offer.response = response;
            }
        }
    }

    fn mark_busy(state: &mut EngineState, courier_id: CourierId, now: DateTime<Utc>) {
        if let Some(presence) = state.couriers.get_mut(&courier_id) {
            presence.availability = Availability::Busy;
            presence.active_orders += 1;
            presence.updated_at = now;
        }
    }
}

fn poisoned() -> DomainError {
    DomainError::invariant("dispatch engine lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DispatchEngine {
        DispatchEngine::new(DispatchConfig::default())
    }

    fn available_courier(engine: &DispatchEngine, location: Location) -> CourierId {
        let id = CourierId::new();
        let now = Utc::now();
        engine.register_courier(id, now).unwrap();
        engine
            .set_availability(id, Availability::Available, now)
            .unwrap();
        engine.update_location(id, location, now).unwrap();
        id
    }

    #[test]
    fn nearest_courier_is_offered_first() {
        let engine = engine();
        let _far = available_courier(&engine, Location::new(10.0, 10.0));
        let near = available_courier(&engine, Location::new(1.0, 1.0));

        let offer = engine
            .request_dispatch(AggregateId::new(), Location::new(0.0, 0.0), Utc::now())
            .unwrap();
        assert_eq!(offer.courier_id, near);
        assert_eq!(offer.offer_sequence, 1);
    }

    #[test]
    fn rejection_auto_offers_next_candidate_which_can_accept() {
        // Scenario: courier A rejects, engine offers courier B, B accepts.
        let engine = engine();
        let a = available_courier(&engine, Location::new(1.0, 0.0));
        let b = available_courier(&engine, Location::new(2.0, 0.0));
        let order_id = AggregateId::new();

        let offer_a = engine
            .request_dispatch(order_id, Location::new(0.0, 0.0), Utc::now())
            .unwrap();
        assert_eq!(offer_a.courier_id, a);

        let outcome = engine
            .respond_to_offer(offer_a.offer_id, a, false, Utc::now())
            .unwrap();
        let offer_b = match outcome {
            DispatchOutcome::ReOffered { offer } => offer,
            other => panic!("expected re-offer, got {other:?}"),
        };
        assert_eq!(offer_b.courier_id, b);
        assert_eq!(offer_b.offer_sequence, 2);

        let outcome = engine
            .respond_to_offer(offer_b.offer_id, b, true, Utc::now())
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Accepted {
                order_id,
                courier_id: b
            }
        );
        assert_eq!(engine.accepted_offer(order_id).unwrap().courier_id, b);
        assert_eq!(
            engine.courier(b).unwrap().availability,
            Availability::Busy
        );
    }

    #[test]
    fn response_to_resolved_offer_is_conflict_not_applied() {
        let engine = engine();
        let a = available_courier(&engine, Location::new(1.0, 0.0));
        let order_id = AggregateId::new();

        let offer = engine
            .request_dispatch(order_id, Location::new(0.0, 0.0), Utc::now())
            .unwrap();
        engine
            .respond_to_offer(offer.offer_id, a, true, Utc::now())
            .unwrap();

        let err = engine
            .respond_to_offer(offer.offer_id, a, false, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        // The acceptance stands.
        assert_eq!(engine.accepted_offer(order_id).unwrap().courier_id, a);
    }

    #[test]
    fn only_the_offer_holder_may_respond() {
        let engine = engine();
        let a = available_courier(&engine, Location::new(1.0, 0.0));
        let _b = available_courier(&engine, Location::new(2.0, 0.0));
        let order_id = AggregateId::new();

        let offer = engine
            .request_dispatch(order_id, Location::new(0.0, 0.0), Utc::now())
            .unwrap();
        assert_eq!(offer.courier_id, a);

        let stranger = CourierId::new();
        let err = engine
            .respond_to_offer(offer.offer_id, stranger, true, Utc::now())
            .unwrap_err();
        assert_eq!(err, DomainError::Unauthorized);
    }

    #[test]
    fn an_order_never_has_two_accepted_offers() {
        let engine = engine();
        let a = available_courier(&engine, Location::new(1.0, 0.0));
        let b = available_courier(&engine, Location::new(2.0, 0.0));
        let order_id = AggregateId::new();

        let offer = engine
            .request_dispatch(order_id, Location::new(0.0, 0.0), Utc::now())
            .unwrap();
        engine
            .respond_to_offer(offer.offer_id, a, true, Utc::now())
            .unwrap();

        let err = engine.assign_manually(order_id, b, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let accepted: Vec<_> = engine
            .offers_for(order_id)
            .into_iter()
            .filter(|o| o.response == OfferResponse::Accepted)
            .collect();
        assert_eq!(accepted.len(), 1);
    }

    #[test]
    fn expiry_sweep_takes_the_rejection_path() {
        let engine = DispatchEngine::new(DispatchConfig {
            offer_ttl_secs: 30,
            ..Default::default()
        });
        let a = available_courier(&engine, Location::new(1.0, 0.0));
        let b = available_courier(&engine, Location::new(2.0, 0.0));
        let order_id = AggregateId::new();

        let now = Utc::now();
        let offer = engine
            .request_dispatch(order_id, Location::new(0.0, 0.0), now)
            .unwrap();
        assert_eq!(offer.courier_id, a);

        let outcomes = engine.sweep_expired(now + Duration::seconds(31));
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            DispatchOutcome::ReOffered { offer } => assert_eq!(offer.courier_id, b),
            other => panic!("expected re-offer, got {other:?}"),
        }

        // A's offer is now terminal; a late accept is a conflict.
        let err = engine
            .respond_to_offer(offer.offer_id, a, true, now + Duration::seconds(40))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn dispatch_exhausts_after_round_limit() {
        let engine = DispatchEngine::new(DispatchConfig {
            max_rounds: 2,
            ..Default::default()
        });
        let a = available_courier(&engine, Location::new(1.0, 0.0));
        let b = available_courier(&engine, Location::new(2.0, 0.0));
        let _c = available_courier(&engine, Location::new(3.0, 0.0));
        let order_id = AggregateId::new();

        let offer = engine
            .request_dispatch(order_id, Location::new(0.0, 0.0), Utc::now())
            .unwrap();
        let outcome = engine
            .respond_to_offer(offer.offer_id, a, false, Utc::now())
            .unwrap();
        let offer_b = match outcome {
            DispatchOutcome::ReOffered { offer } => offer,
            other => panic!("expected re-offer, got {other:?}"),
        };

        let outcome = engine
            .respond_to_offer(offer_b.offer_id, b, false, Utc::now())
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Exhausted {
                order_id,
                rounds: 2
            }
        );
    }

    #[test]
    fn no_available_courier_is_resource_exhausted() {
        let engine = engine();
        let err = engine
            .request_dispatch(AggregateId::new(), Location::new(0.0, 0.0), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::ResourceExhausted(_)));
    }

    #[test]
    fn released_courier_becomes_available_again() {
        let engine = engine();
        let a = available_courier(&engine, Location::new(1.0, 0.0));
        let order_id = AggregateId::new();

        let offer = engine
            .request_dispatch(order_id, Location::new(0.0, 0.0), Utc::now())
            .unwrap();
        engine
            .respond_to_offer(offer.offer_id, a, true, Utc::now())
            .unwrap();
        assert_eq!(engine.courier(a).unwrap().availability, Availability::Busy);

        engine.release_courier(a, Utc::now()).unwrap();
        let presence = engine.courier(a).unwrap();
        assert_eq!(presence.availability, Availability::Available);
        assert_eq!(presence.active_orders, 0);
    }

    #[test]
    fn couriers_cannot_set_themselves_busy() {
        let engine = engine();
        let a = available_courier(&engine, Location::new(1.0, 0.0));
        let err = engine
            .set_availability(a, Availability::Busy, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
