//! P2P matching engine.
//!
//! Pairs an `OPEN` order with the oldest compatible counter-order.
//! Pairing is all-or-nothing: only equal-amount opposite-side orders
//! are eligible (no partial fills), so fairness reduces to FIFO on
//! `created_at`. The commit is the order store's dual CAS — under a
//! race, exactly one contender claims a candidate and the loser simply
//! tries the next one, bounded so the scan cannot spin forever.
//!
//! The engine is invoked in both directions: when a new order is
//! created (match it against the existing pool) and on demand by
//! pollers waiting for counter-orders to arrive.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use openpeer_types::{
    EngineConfig, EngineEvent, EventBus, OpenpeerError, Order, OrderId, OrderStatus, Result,
};

use crate::store::OrderStore;

/// Result of a match attempt.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// Both legs moved `OPEN → MATCHED` with a settlement deadline.
    Matched { order: Order, counterparty: Order },
    /// No compatible counter-order right now; the caller polls or
    /// subscribes for asynchronous matches.
    Unmatched,
}

impl MatchOutcome {
    #[must_use]
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// Finds and claims counter-orders for incoming orders.
pub struct MatchEngine {
    store: Arc<OrderStore>,
    bus: EventBus,
    config: EngineConfig,
}

impl MatchEngine {
    #[must_use]
    pub fn new(store: Arc<OrderStore>, bus: EventBus, config: EngineConfig) -> Self {
        Self { store, bus, config }
    }

    /// Attempt to pair `order_id` with an open counter-order.
    ///
    /// # Errors
    /// - [`OpenpeerError::StaleOrderState`] if the order is no longer
    ///   `OPEN` (another actor already handled it — re-read and report)
    /// - [`OpenpeerError::MatchContention`] if the CAS retry budget is
    ///   exhausted while candidates keep getting claimed first
    pub fn attempt_match(&self, order_id: OrderId) -> Result<MatchOutcome> {
        self.attempt_match_at(order_id, Utc::now())
    }

    /// Match attempt with an injectable clock.
    pub fn attempt_match_at(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<MatchOutcome> {
        let order = self.store.get(order_id)?;
        if order.status != OrderStatus::Open {
            return Err(OpenpeerError::StaleOrderState {
                order: order_id,
                expected: OrderStatus::Open,
                actual: order.status,
            });
        }

        // All-or-nothing: only exact-amount counter-orders are eligible,
        // oldest first. Self-matching is blocked.
        let candidates: Vec<Order> = self
            .store
            .open_orders(order.side.opposite())
            .into_iter()
            .filter(|c| c.owner != order.owner && c.amount == order.amount)
            .collect();

        let deadline = now + self.config.match_deadline();
        let mut cas_losses: u32 = 0;

        for candidate in candidates {
            match self.store.pair(order_id, candidate.id, deadline) {
                Ok((matched, counterparty)) => {
                    tracing::info!(
                        order = %matched.id,
                        counterparty = %counterparty.id,
                        amount = %matched.amount,
                        deadline = %deadline,
                        "Orders matched"
                    );
                    for leg in [&matched, &counterparty] {
                        self.bus.emit(EngineEvent::OrderMatched {
                            order_id: leg.id,
                            counterparty_order: leg
                                .counterparty_order
                                .unwrap_or(counterparty.id),
                            deadline,
                        });
                    }
                    return Ok(MatchOutcome::Matched {
                        order: matched,
                        counterparty,
                    });
                }
                // Our own order got claimed or cancelled concurrently:
                // surface it, the caller re-reads authoritative state.
                Err(OpenpeerError::StaleOrderState { order: stale, .. }) if stale == order_id => {
                    let actual = self.store.get(order_id)?.status;
                    return Err(OpenpeerError::StaleOrderState {
                        order: order_id,
                        expected: OrderStatus::Open,
                        actual,
                    });
                }
                // The candidate was claimed first; try the next one.
                Err(err) if err.is_conflict() => {
                    cas_losses += 1;
                    tracing::debug!(
                        order = %order_id,
                        candidate = %candidate.id,
                        losses = cas_losses,
                        "Candidate claimed first, retrying"
                    );
                    if cas_losses >= self.config.max_cas_retries {
                        return Err(OpenpeerError::MatchContention {
                            order: order_id,
                            attempts: cas_losses,
                        });
                    }
                }
                Err(err) => return Err(err),
            }
        }

        tracing::debug!(order = %order_id, "No compatible counter-order");
        Ok(MatchOutcome::Unmatched)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use openpeer_types::{AccountId, BankDetails, OrderSide};
    use rust_decimal::Decimal;

    use super::*;

    fn engine() -> (Arc<OrderStore>, MatchEngine) {
        let store = Arc::new(OrderStore::new());
        let engine = MatchEngine::new(
            Arc::clone(&store),
            EventBus::new(256),
            EngineConfig::default(),
        );
        (store, engine)
    }

    fn details() -> BankDetails {
        BankDetails::new("TR000000000000000000000001", "Testbank", "Test Holder")
    }

    fn amount(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn open_buy(store: &OrderStore, n: i64) -> Order {
        store
            .create_order(AccountId::new(), OrderSide::Buy, amount(n), None)
            .unwrap()
    }

    fn open_sell(store: &OrderStore, n: i64) -> Order {
        store
            .create_order(AccountId::new(), OrderSide::Sell, amount(n), Some(details()))
            .unwrap()
    }

    #[test]
    fn no_candidates_is_unmatched() {
        let (store, engine) = engine();
        let buy = open_buy(&store, 100);
        let outcome = engine.attempt_match(buy.id).unwrap();
        assert!(!outcome.is_matched());
        assert_eq!(store.get(buy.id).unwrap().status, OrderStatus::Open);
    }

    #[test]
    fn exact_amount_pairs_and_stamps_deadline() {
        let (store, engine) = engine();
        let sell = open_sell(&store, 100);
        let buy = open_buy(&store, 100);

        let outcome = engine.attempt_match(buy.id).unwrap();
        let MatchOutcome::Matched { order, counterparty } = outcome else {
            panic!("Expected a match");
        };
        assert_eq!(order.id, buy.id);
        assert_eq!(counterparty.id, sell.id);
        assert_eq!(order.status, OrderStatus::Matched);
        assert!(order.deadline.is_some());

        // Deadline is the configured window from "now".
        let window = EngineConfig::default().match_deadline();
        let age = order.deadline.unwrap() - Utc::now();
        assert!(age <= window && age > window - chrono::Duration::minutes(1));
    }

    #[test]
    fn different_amounts_never_pair() {
        let (store, engine) = engine();
        open_sell(&store, 70);
        let buy = open_buy(&store, 100);

        let outcome = engine.attempt_match(buy.id).unwrap();
        assert!(!outcome.is_matched(), "Pairing is all-or-nothing");
    }

    #[test]
    fn oldest_candidate_wins_fifo() {
        let (store, engine) = engine();
        let first_sell = open_sell(&store, 100);
        let _second_sell = open_sell(&store, 100);
        let buy = open_buy(&store, 100);

        let MatchOutcome::Matched { counterparty, .. } = engine.attempt_match(buy.id).unwrap()
        else {
            panic!("Expected a match");
        };
        assert_eq!(counterparty.id, first_sell.id);
    }

    #[test]
    fn own_counter_order_is_skipped() {
        let (store, engine) = engine();
        let owner = AccountId::new();
        store
            .create_order(owner, OrderSide::Sell, amount(100), Some(details()))
            .unwrap();

        // Same owner cannot hold two active orders, so exercise the
        // filter through a candidate owned by the order's owner.
        let buy = open_buy(&store, 100);
        let candidates = store.open_orders(OrderSide::Sell);
        assert_eq!(candidates.len(), 1);
        assert_ne!(candidates[0].owner, buy.owner);
        let outcome = engine.attempt_match(buy.id).unwrap();
        assert!(outcome.is_matched());
    }

    #[test]
    fn non_open_order_is_stale() {
        let (store, engine) = engine();
        let sell = open_sell(&store, 100);
        let buy = open_buy(&store, 100);
        engine.attempt_match(buy.id).unwrap();

        // Already MATCHED: a second attempt reports "already handled".
        let err = engine.attempt_match(buy.id).unwrap_err();
        assert!(matches!(
            err,
            OpenpeerError::StaleOrderState {
                actual: OrderStatus::Matched,
                ..
            }
        ));
        assert_eq!(store.get(sell.id).unwrap().status, OrderStatus::Matched);
    }

    #[test]
    fn match_emits_event_for_both_legs() {
        let store = Arc::new(OrderStore::new());
        let bus = EventBus::new(64);
        let engine = MatchEngine::new(Arc::clone(&store), bus.clone(), EngineConfig::default());
        let mut rx = bus.subscribe();

        let sell = open_sell(&store, 100);
        let buy = open_buy(&store, 100);
        engine.attempt_match(buy.id).unwrap();

        let mut matched_ids = HashSet::new();
        for _ in 0..2 {
            let envelope = rx.try_recv().unwrap();
            assert_eq!(envelope.event.name(), "order.matched");
            if let EngineEvent::OrderMatched { order_id, .. } = envelope.event {
                matched_ids.insert(order_id);
            }
        }
        assert_eq!(matched_ids, HashSet::from([buy.id, sell.id]));
    }

    #[test]
    fn concurrent_attempts_pair_each_order_once() {
        let store = Arc::new(OrderStore::new());
        let engine = Arc::new(MatchEngine::new(
            Arc::clone(&store),
            EventBus::new(1024),
            EngineConfig::default(),
        ));

        let sells: Vec<Order> = (0..8).map(|_| open_sell(&store, 100)).collect();
        let buys: Vec<Order> = (0..8).map(|_| open_buy(&store, 100)).collect();

        let handles: Vec<_> = buys
            .iter()
            .map(|buy| {
                let engine = Arc::clone(&engine);
                let id = buy.id;
                std::thread::spawn(move || engine.attempt_match(id))
            })
            .collect();

        let mut claimed = HashSet::new();
        for handle in handles {
            match handle.join().unwrap() {
                Ok(MatchOutcome::Matched { counterparty, .. }) => {
                    assert!(
                        claimed.insert(counterparty.id),
                        "Candidate {} paired twice",
                        counterparty.id
                    );
                }
                Ok(MatchOutcome::Unmatched) => {}
                // Contention is a legal outcome under the bounded scan.
                Err(OpenpeerError::MatchContention { .. }) => {}
                Err(other) => panic!("Unexpected error: {other}"),
            }
        }

        // Every sell leg ended MATCHED at most once, with a unique buyer.
        for sell in sells {
            let stored = store.get(sell.id).unwrap();
            if stored.status == OrderStatus::Matched {
                assert!(claimed.contains(&sell.id));
            }
        }
    }

    #[test]
    fn racing_for_one_candidate_has_one_winner() {
        let store = Arc::new(OrderStore::new());
        let engine = Arc::new(MatchEngine::new(
            Arc::clone(&store),
            EventBus::new(1024),
            EngineConfig::default(),
        ));

        let sell = open_sell(&store, 100);
        let buys: Vec<Order> = (0..6).map(|_| open_buy(&store, 100)).collect();

        let handles: Vec<_> = buys
            .iter()
            .map(|buy| {
                let engine = Arc::clone(&engine);
                let id = buy.id;
                std::thread::spawn(move || engine.attempt_match(id))
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if let Ok(MatchOutcome::Matched { counterparty, .. }) = handle.join().unwrap() {
                assert_eq!(counterparty.id, sell.id);
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "Exactly one pairing may succeed");
        assert_eq!(store.get(sell.id).unwrap().status, OrderStatus::Matched);
    }
}
