//! Order storage with compare-and-swap status transitions.
//!
//! Every status change goes through a conditional write: it succeeds
//! only if the stored status still equals the caller's expected value.
//! Pair-level operations (`pair`, `transition_pair`) move both legs
//! under one write lock, so within a pair transitions are totally
//! ordered and a pairing race has exactly one winner.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use openpeer_types::{
    AccountId, BankDetails, OpenpeerError, Order, OrderId, OrderSide, OrderStatus, Result,
};
use rust_decimal::Decimal;

/// Extra fields applied together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub counterparty_order: Option<OrderId>,
    pub counterparty_account: Option<AccountId>,
    pub deadline: Option<DateTime<Utc>>,
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
}

/// Keyed store of P2P orders.
pub struct OrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl OrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
        }
    }

    /// Create an `OPEN` order for `owner`.
    ///
    /// # Errors
    /// - [`OpenpeerError::InvalidAmount`] if `amount <= 0`
    /// - [`OpenpeerError::MissingBankDetails`] on a SELL without an IBAN
    /// - [`OpenpeerError::ActiveOrderExists`] if the owner already holds
    ///   a non-terminal order (checked under the write lock, so two
    ///   concurrent creations cannot both slip through)
    pub fn create_order(
        &self,
        owner: AccountId,
        side: OrderSide,
        amount: Decimal,
        bank_details: Option<BankDetails>,
    ) -> Result<Order> {
        if amount <= Decimal::ZERO {
            return Err(OpenpeerError::InvalidAmount { amount });
        }
        let bank_details = match side {
            OrderSide::Sell => match bank_details {
                Some(details) if !details.iban.trim().is_empty() => Some(details),
                _ => return Err(OpenpeerError::MissingBankDetails),
            },
            // Buy-side settlement lands on the seller's snapshot.
            OrderSide::Buy => None,
        };

        let mut orders = self.orders.write().expect("order lock poisoned");
        if let Some(existing) = orders.values().find(|o| o.owner == owner && o.is_active()) {
            return Err(OpenpeerError::ActiveOrderExists {
                account: owner,
                existing: existing.id,
            });
        }

        let now = Utc::now();
        let order = Order {
            id: OrderId::new(),
            owner,
            side,
            amount,
            status: OrderStatus::Open,
            counterparty_order: None,
            counterparty_account: None,
            bank_details,
            deadline: None,
            buyer_confirmed_at: None,
            created_at: now,
            updated_at: now,
        };
        orders.insert(order.id, order.clone());
        tracing::info!(order = %order.id, owner = %owner, side = %side, amount = %amount, "Order created");
        Ok(order)
    }

    /// Fetch a snapshot of an order.
    pub fn get(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .read()
            .expect("order lock poisoned")
            .get(&order_id)
            .cloned()
            .ok_or(OpenpeerError::OrderNotFound(order_id))
    }

    /// The account's current non-terminal order, if any.
    #[must_use]
    pub fn active_order(&self, account_id: AccountId) -> Option<Order> {
        self.orders
            .read()
            .expect("order lock poisoned")
            .values()
            .find(|o| o.owner == account_id && o.is_active())
            .cloned()
    }

    /// Snapshot of all `OPEN` orders on one side, oldest first.
    #[must_use]
    pub fn open_orders(&self, side: OrderSide) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .read()
            .expect("order lock poisoned")
            .values()
            .filter(|o| o.side == side && o.status == OrderStatus::Open)
            .cloned()
            .collect();
        open.sort_by_key(|o| (o.created_at, o.id));
        open
    }

    /// Snapshot of every order (expiry sweep worklist).
    #[must_use]
    pub fn snapshot(&self) -> Vec<Order> {
        self.orders
            .read()
            .expect("order lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Conditional status transition — the single CAS choke point.
    ///
    /// Succeeds only if the stored status equals `from`; otherwise the
    /// caller lost a race and gets [`OpenpeerError::StaleOrderState`].
    /// The requested edge must exist in the state machine.
    pub fn transition(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        patch: OrderPatch,
    ) -> Result<Order> {
        let mut orders = self.orders.write().expect("order lock poisoned");
        let order = Self::cas(&mut orders, order_id, from, to)?;
        Self::apply_patch(order, patch);
        Ok(order.clone())
    }

    /// Move both legs of a matched pair `from → to` in one atomic step.
    ///
    /// `confirmed_at`, when set, is stamped on the BUY leg (the buyer's
    /// confirmation timestamp). Returns `(order, counterparty)`.
    pub fn transition_pair(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Result<(Order, Order)> {
        let mut orders = self.orders.write().expect("order lock poisoned");
        let counterparty_id = orders
            .get(&order_id)
            .ok_or(OpenpeerError::OrderNotFound(order_id))?
            .counterparty_order
            .ok_or_else(|| {
                OpenpeerError::Internal(format!("order {order_id} has no counterparty"))
            })?;

        // Check both legs before touching either: all-or-nothing.
        for id in [order_id, counterparty_id] {
            let leg = orders.get(&id).ok_or(OpenpeerError::OrderNotFound(id))?;
            if leg.status != from {
                return Err(OpenpeerError::StaleOrderState {
                    order: id,
                    expected: from,
                    actual: leg.status,
                });
            }
        }

        for id in [order_id, counterparty_id] {
            let leg = Self::cas(&mut orders, id, from, to)?;
            if leg.side == OrderSide::Buy {
                leg.buyer_confirmed_at = confirmed_at.or(leg.buyer_confirmed_at);
            }
        }

        let order = orders[&order_id].clone();
        let counterparty = orders[&counterparty_id].clone();
        Ok((order, counterparty))
    }

    /// Pair two `OPEN` orders: the dual CAS match commit.
    ///
    /// Both rows move `OPEN → MATCHED` under one lock with counterparty
    /// fields and the settlement `deadline` stamped on each. If either
    /// row is no longer `OPEN` the whole commit fails and nothing
    /// changes — a candidate claimed first surfaces as
    /// [`OpenpeerError::StaleOrderState`] naming the stale row.
    pub fn pair(
        &self,
        order_id: OrderId,
        candidate_id: OrderId,
        deadline: DateTime<Utc>,
    ) -> Result<(Order, Order)> {
        let mut orders = self.orders.write().expect("order lock poisoned");

        let order = orders
            .get(&order_id)
            .ok_or(OpenpeerError::OrderNotFound(order_id))?
            .clone();
        let candidate = orders
            .get(&candidate_id)
            .ok_or(OpenpeerError::OrderNotFound(candidate_id))?
            .clone();

        for leg in [&order, &candidate] {
            if leg.status != OrderStatus::Open {
                return Err(OpenpeerError::StaleOrderState {
                    order: leg.id,
                    expected: OrderStatus::Open,
                    actual: leg.status,
                });
            }
        }
        if order.owner == candidate.owner {
            return Err(OpenpeerError::Internal(format!(
                "self-match attempted by account {}",
                order.owner
            )));
        }
        if order.side == candidate.side || order.amount != candidate.amount {
            return Err(OpenpeerError::Internal(format!(
                "incompatible pair {order_id} / {candidate_id}"
            )));
        }

        for (id, other) in [(order_id, &candidate), (candidate_id, &order)] {
            let leg = Self::cas(&mut orders, id, OrderStatus::Open, OrderStatus::Matched)?;
            leg.counterparty_order = Some(other.id);
            leg.counterparty_account = Some(other.owner);
            leg.deadline = Some(deadline);
        }

        Ok((orders[&order_id].clone(), orders[&candidate_id].clone()))
    }

    /// Cancel an order on behalf of `actor`.
    ///
    /// Allowed while `OPEN` (owner only) or `MATCHED` (either leg's
    /// owner — payment has not been claimed yet); cancelling a MATCHED
    /// leg unwinds **both** legs. Once `PAID`, cancellation is rejected;
    /// only the recipient's reject path resolves the pair. Returns every
    /// order that was cancelled.
    pub fn cancel(&self, order_id: OrderId, actor: AccountId) -> Result<Vec<Order>> {
        let mut orders = self.orders.write().expect("order lock poisoned");
        let order = orders
            .get(&order_id)
            .ok_or(OpenpeerError::OrderNotFound(order_id))?
            .clone();

        match order.status {
            OrderStatus::Open => {
                if order.owner != actor {
                    return Err(OpenpeerError::NotOrderParty {
                        order: order_id,
                        account: actor,
                    });
                }
                let leg = Self::cas(&mut orders, order_id, OrderStatus::Open, OrderStatus::Cancelled)?;
                Ok(vec![leg.clone()])
            }
            OrderStatus::Matched => {
                let is_party =
                    order.owner == actor || order.counterparty_account == Some(actor);
                if !is_party {
                    return Err(OpenpeerError::NotOrderParty {
                        order: order_id,
                        account: actor,
                    });
                }
                let counterparty_id = order.counterparty_order.ok_or_else(|| {
                    OpenpeerError::Internal(format!("MATCHED order {order_id} missing counterparty"))
                })?;
                let mut cancelled = Vec::with_capacity(2);
                for id in [order_id, counterparty_id] {
                    let leg =
                        Self::cas(&mut orders, id, OrderStatus::Matched, OrderStatus::Cancelled)?;
                    cancelled.push(leg.clone());
                }
                Ok(cancelled)
            }
            OrderStatus::Paid => Err(OpenpeerError::CannotCancelPaidOrder(order_id)),
            actual => Err(OpenpeerError::StaleOrderState {
                order: order_id,
                expected: OrderStatus::Open,
                actual,
            }),
        }
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().expect("order lock poisoned").len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.read().expect("order lock poisoned").is_empty()
    }

    /// The raw CAS: requires a legal edge and a matching current status.
    fn cas(
        orders: &mut HashMap<OrderId, Order>,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<&mut Order> {
        if !from.can_transition(to) {
            return Err(OpenpeerError::Internal(format!(
                "illegal transition {from} -> {to} requested for {order_id}"
            )));
        }
        let order = orders
            .get_mut(&order_id)
            .ok_or(OpenpeerError::OrderNotFound(order_id))?;
        if order.status != from {
            return Err(OpenpeerError::StaleOrderState {
                order: order_id,
                expected: from,
                actual: order.status,
            });
        }
        order.status = to;
        order.updated_at = Utc::now();
        tracing::debug!(order = %order_id, from = %from, to = %to, "Order transitioned");
        Ok(order)
    }

    fn apply_patch(order: &mut Order, patch: OrderPatch) {
        if patch.counterparty_order.is_some() {
            order.counterparty_order = patch.counterparty_order;
        }
        if patch.counterparty_account.is_some() {
            order.counterparty_account = patch.counterparty_account;
        }
        if patch.deadline.is_some() {
            order.deadline = patch.deadline;
        }
        if patch.buyer_confirmed_at.is_some() {
            order.buyer_confirmed_at = patch.buyer_confirmed_at;
        }
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn details() -> BankDetails {
        BankDetails::new("TR000000000000000000000001", "Testbank", "Test Holder")
    }

    fn amount(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    #[test]
    fn create_open_order() {
        let store = OrderStore::new();
        let owner = AccountId::new();
        let order = store
            .create_order(owner, OrderSide::Buy, amount(100), None)
            .unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.owner, owner);
        assert!(order.bank_details.is_none());
    }

    #[test]
    fn non_positive_amount_rejected() {
        let store = OrderStore::new();
        for bad in [Decimal::ZERO, amount(-10)] {
            let err = store
                .create_order(AccountId::new(), OrderSide::Buy, bad, None)
                .unwrap_err();
            assert!(matches!(err, OpenpeerError::InvalidAmount { .. }));
        }
    }

    #[test]
    fn sell_requires_bank_details() {
        let store = OrderStore::new();
        let err = store
            .create_order(AccountId::new(), OrderSide::Sell, amount(100), None)
            .unwrap_err();
        assert!(matches!(err, OpenpeerError::MissingBankDetails));

        let blank = BankDetails::new("   ", "Testbank", "Holder");
        let err = store
            .create_order(AccountId::new(), OrderSide::Sell, amount(100), Some(blank))
            .unwrap_err();
        assert!(matches!(err, OpenpeerError::MissingBankDetails));
    }

    #[test]
    fn one_active_order_per_account() {
        let store = OrderStore::new();
        let owner = AccountId::new();
        let first = store
            .create_order(owner, OrderSide::Buy, amount(100), None)
            .unwrap();

        let err = store
            .create_order(owner, OrderSide::Buy, amount(50), None)
            .unwrap_err();
        assert!(
            matches!(err, OpenpeerError::ActiveOrderExists { existing, .. } if existing == first.id)
        );

        // A terminal order releases the slot.
        store.cancel(first.id, owner).unwrap();
        store
            .create_order(owner, OrderSide::Buy, amount(50), None)
            .unwrap();
    }

    #[test]
    fn concurrent_creation_admits_exactly_one() {
        let store = Arc::new(OrderStore::new());
        let owner = AccountId::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .create_order(owner, OrderSide::Buy, amount(100), None)
                        .is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1, "Exactly one creation may win");
    }

    #[test]
    fn transition_cas_detects_stale_state() {
        let store = OrderStore::new();
        let order = store
            .create_order(AccountId::new(), OrderSide::Buy, amount(100), None)
            .unwrap();

        store
            .transition(order.id, OrderStatus::Open, OrderStatus::Expired, OrderPatch::default())
            .unwrap();

        let err = store
            .transition(order.id, OrderStatus::Open, OrderStatus::Cancelled, OrderPatch::default())
            .unwrap_err();
        assert!(matches!(
            err,
            OpenpeerError::StaleOrderState {
                actual: OrderStatus::Expired,
                ..
            }
        ));
    }

    #[test]
    fn illegal_edges_are_refused() {
        let store = OrderStore::new();
        let order = store
            .create_order(AccountId::new(), OrderSide::Buy, amount(100), None)
            .unwrap();
        let err = store
            .transition(order.id, OrderStatus::Open, OrderStatus::Completed, OrderPatch::default())
            .unwrap_err();
        assert!(matches!(err, OpenpeerError::Internal(_)));
    }

    fn paired(store: &OrderStore) -> (Order, Order) {
        let buy = store
            .create_order(AccountId::new(), OrderSide::Buy, amount(100), None)
            .unwrap();
        let sell = store
            .create_order(AccountId::new(), OrderSide::Sell, amount(100), Some(details()))
            .unwrap();
        store
            .pair(buy.id, sell.id, Utc::now() + chrono::Duration::minutes(20))
            .unwrap()
    }

    #[test]
    fn pair_stamps_both_legs() {
        let store = OrderStore::new();
        let (buy, sell) = paired(&store);

        assert_eq!(buy.status, OrderStatus::Matched);
        assert_eq!(sell.status, OrderStatus::Matched);
        assert_eq!(buy.counterparty_order, Some(sell.id));
        assert_eq!(sell.counterparty_order, Some(buy.id));
        assert_eq!(buy.counterparty_account, Some(sell.owner));
        assert!(buy.deadline.is_some());
        assert_eq!(buy.deadline, sell.deadline);
    }

    #[test]
    fn pair_refuses_claimed_candidate() {
        let store = OrderStore::new();
        let buy = store
            .create_order(AccountId::new(), OrderSide::Buy, amount(100), None)
            .unwrap();
        let sell = store
            .create_order(AccountId::new(), OrderSide::Sell, amount(100), Some(details()))
            .unwrap();
        let other_buy = store
            .create_order(AccountId::new(), OrderSide::Buy, amount(100), None)
            .unwrap();

        let deadline = Utc::now() + chrono::Duration::minutes(20);
        store.pair(buy.id, sell.id, deadline).unwrap();

        // The sell leg has been claimed; the second commit must not
        // touch either row.
        let err = store.pair(other_buy.id, sell.id, deadline).unwrap_err();
        assert!(
            matches!(err, OpenpeerError::StaleOrderState { order, .. } if order == sell.id)
        );
        assert_eq!(store.get(other_buy.id).unwrap().status, OrderStatus::Open);
        assert!(store.get(other_buy.id).unwrap().counterparty_order.is_none());
    }

    #[test]
    fn pair_refuses_self_match_and_mismatched_amounts() {
        let store = OrderStore::new();
        let buy = store
            .create_order(AccountId::new(), OrderSide::Buy, amount(100), None)
            .unwrap();
        let sell = store
            .create_order(AccountId::new(), OrderSide::Sell, amount(70), Some(details()))
            .unwrap();
        let deadline = Utc::now() + chrono::Duration::minutes(20);

        let err = store.pair(buy.id, sell.id, deadline).unwrap_err();
        assert!(matches!(err, OpenpeerError::Internal(_)));
    }

    #[test]
    fn transition_pair_moves_both_legs() {
        let store = OrderStore::new();
        let (buy, sell) = paired(&store);

        let (a, b) = store
            .transition_pair(sell.id, OrderStatus::Matched, OrderStatus::Paid, None)
            .unwrap();
        assert_eq!(a.status, OrderStatus::Paid);
        assert_eq!(b.status, OrderStatus::Paid);
        assert_eq!(store.get(buy.id).unwrap().status, OrderStatus::Paid);
    }

    #[test]
    fn transition_pair_stamps_buyer_confirmation() {
        let store = OrderStore::new();
        let (buy, sell) = paired(&store);
        store
            .transition_pair(sell.id, OrderStatus::Matched, OrderStatus::Paid, None)
            .unwrap();

        let now = Utc::now();
        store
            .transition_pair(buy.id, OrderStatus::Paid, OrderStatus::Completed, Some(now))
            .unwrap();
        assert_eq!(store.get(buy.id).unwrap().buyer_confirmed_at, Some(now));
        assert_eq!(store.get(sell.id).unwrap().buyer_confirmed_at, None);
    }

    #[test]
    fn cancel_open_order_by_owner_only() {
        let store = OrderStore::new();
        let order = store
            .create_order(AccountId::new(), OrderSide::Buy, amount(100), None)
            .unwrap();

        let err = store.cancel(order.id, AccountId::new()).unwrap_err();
        assert!(matches!(err, OpenpeerError::NotOrderParty { .. }));

        let cancelled = store.cancel(order.id, order.owner).unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].status, OrderStatus::Cancelled);
    }

    #[test]
    fn cancel_matched_unwinds_both_legs() {
        let store = OrderStore::new();
        let (buy, sell) = paired(&store);

        // The counterpart may cancel too — payment has not been claimed.
        let cancelled = store.cancel(buy.id, sell.owner).unwrap();
        assert_eq!(cancelled.len(), 2);
        assert_eq!(store.get(buy.id).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(store.get(sell.id).unwrap().status, OrderStatus::Cancelled);
    }

    #[test]
    fn paid_order_cannot_be_cancelled() {
        let store = OrderStore::new();
        let (buy, sell) = paired(&store);
        store
            .transition_pair(sell.id, OrderStatus::Matched, OrderStatus::Paid, None)
            .unwrap();

        let err = store.cancel(buy.id, buy.owner).unwrap_err();
        assert!(matches!(err, OpenpeerError::CannotCancelPaidOrder(_)));
        let err = store.cancel(sell.id, sell.owner).unwrap_err();
        assert!(matches!(err, OpenpeerError::CannotCancelPaidOrder(_)));
    }

    #[test]
    fn open_orders_are_fifo() {
        let store = OrderStore::new();
        let first = store
            .create_order(AccountId::new(), OrderSide::Sell, amount(100), Some(details()))
            .unwrap();
        let second = store
            .create_order(AccountId::new(), OrderSide::Sell, amount(100), Some(details()))
            .unwrap();

        let open = store.open_orders(OrderSide::Sell);
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, first.id);
        assert_eq!(open[1].id, second.id);
        assert!(store.open_orders(OrderSide::Buy).is_empty());
    }

    #[test]
    fn active_order_lookup() {
        let store = OrderStore::new();
        let owner = AccountId::new();
        assert!(store.active_order(owner).is_none());

        let order = store
            .create_order(owner, OrderSide::Buy, amount(100), None)
            .unwrap();
        assert_eq!(store.active_order(owner).unwrap().id, order.id);

        store.cancel(order.id, owner).unwrap();
        assert!(store.active_order(owner).is_none());
    }
}
