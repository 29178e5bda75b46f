//! Settlement workflow: the payment-confirmation handshake and the
//! exactly-once balance transfer.
//!
//! The transfer is journaled before it is applied: both legs derive
//! deterministic transaction ids from the pair, the journal entries act
//! as the idempotency keys, and the pair's `PAID → COMPLETED` flip is
//! the commit marker. A crash anywhere in between is repaired by
//! [`Settlement::reconcile`], which resumes from whatever the journal
//! already recorded — never applying a leg twice.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use openpeer_ledger::{LedgerStore, TransactionJournal};
use openpeer_orders::OrderStore;
use openpeer_types::{
    AccountId, EngineConfig, EngineEvent, EventBus, OpenpeerError, Order, OrderId, OrderSide,
    OrderStatus, Result, Transaction, TxId, TxStatus, TxType,
};

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pairs whose settlement was resumed and committed.
    pub resumed: usize,
}

/// Drives matched pairs through payment confirmation and settlement.
pub struct Settlement {
    ledger: Arc<LedgerStore>,
    journal: Arc<TransactionJournal>,
    orders: Arc<OrderStore>,
    bus: EventBus,
    config: EngineConfig,
    /// Serializes the settle path in-process; cross-process safety comes
    /// from the ledger/journal CAS semantics.
    settle_lock: Mutex<()>,
}

impl Settlement {
    #[must_use]
    pub fn new(
        ledger: Arc<LedgerStore>,
        journal: Arc<TransactionJournal>,
        orders: Arc<OrderStore>,
        bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            journal,
            orders,
            bus,
            config,
            settle_lock: Mutex::new(()),
        }
    }

    /// The SELL leg's owner declares the bank transfer sent.
    ///
    /// Both legs move `MATCHED → PAID`. Past the deadline the claim is
    /// refused — the sweeper will expire the pair instead.
    pub fn mark_paid(&self, order_id: OrderId, actor: AccountId) -> Result<(Order, Order)> {
        self.mark_paid_at(order_id, actor, Utc::now())
    }

    /// [`Settlement::mark_paid`] with an injectable clock.
    pub fn mark_paid_at(
        &self,
        order_id: OrderId,
        actor: AccountId,
        now: DateTime<Utc>,
    ) -> Result<(Order, Order)> {
        let (_buy, sell) = self.legs(order_id)?;
        if sell.owner != actor {
            return Err(OpenpeerError::NotOrderParty {
                order: order_id,
                account: actor,
            });
        }
        if sell.status != OrderStatus::Matched {
            return Err(OpenpeerError::StaleOrderState {
                order: order_id,
                expected: OrderStatus::Matched,
                actual: sell.status,
            });
        }
        let deadline = sell.deadline.ok_or_else(|| {
            OpenpeerError::Internal(format!("MATCHED order {} has no deadline", sell.id))
        })?;
        if now > deadline {
            return Err(OpenpeerError::DeadlineExpired(order_id));
        }

        let (a, b) =
            self.orders
                .transition_pair(order_id, OrderStatus::Matched, OrderStatus::Paid, None)?;
        tracing::info!(order = %a.id, counterparty = %b.id, "Payment claimed");
        self.bus.emit(EngineEvent::OrderPaid {
            order_id: a.id,
            counterparty_order: b.id,
        });
        self.bus.emit(EngineEvent::OrderPaid {
            order_id: b.id,
            counterparty_order: a.id,
        });
        Ok(Self::normalize(a, b))
    }

    /// The BUY leg's owner confirms the payment arrived: executes the
    /// atomic balance transfer and completes the pair.
    ///
    /// Replaying the call after a successful settlement is a no-op with
    /// `Ok` — the deterministic transaction ids guarantee the balance
    /// moves exactly once.
    pub fn confirm_received(&self, order_id: OrderId, actor: AccountId) -> Result<(Order, Order)> {
        self.confirm_received_at(order_id, actor, Utc::now())
    }

    /// [`Settlement::confirm_received`] with an injectable clock.
    pub fn confirm_received_at(
        &self,
        order_id: OrderId,
        actor: AccountId,
        now: DateTime<Utc>,
    ) -> Result<(Order, Order)> {
        let (buy, sell) = self.legs(order_id)?;
        if buy.owner != actor {
            return Err(OpenpeerError::NotOrderParty {
                order: order_id,
                account: actor,
            });
        }
        match buy.status {
            OrderStatus::Paid | OrderStatus::Completed => {}
            actual => {
                return Err(OpenpeerError::StaleOrderState {
                    order: order_id,
                    expected: OrderStatus::Paid,
                    actual,
                });
            }
        }
        self.settle_pair(&buy, &sell, now)
    }

    /// The BUY leg's owner rejects the payment claim: the pair unwinds
    /// to `CANCELLED` (never back to `OPEN` — trust has been breached)
    /// and no balance moves. The pair is flagged for manual review via
    /// the disputed cancellation event.
    pub fn reject(&self, order_id: OrderId, actor: AccountId) -> Result<(Order, Order)> {
        let (buy, _sell) = self.legs(order_id)?;
        if buy.owner != actor {
            return Err(OpenpeerError::NotOrderParty {
                order: order_id,
                account: actor,
            });
        }

        // Serialize against settle_pair: a rejection must not land
        // between the balance transfer and its commit flip.
        let _guard = self.settle_lock.lock().expect("settle lock poisoned");
        let current = self.orders.get(buy.id)?;
        if current.status != OrderStatus::Paid {
            return Err(OpenpeerError::StaleOrderState {
                order: order_id,
                expected: OrderStatus::Paid,
                actual: current.status,
            });
        }

        let (a, b) = self.orders.transition_pair(
            buy.id,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            None,
        )?;
        tracing::warn!(
            order = %a.id,
            counterparty = %b.id,
            "Payment claim rejected by recipient; pair flagged for review"
        );
        for leg in [&a, &b] {
            self.bus.emit(EngineEvent::OrderCancelled {
                order_id: leg.id,
                disputed: true,
            });
        }
        Ok(Self::normalize(a, b))
    }

    /// Restart pass: finish settlements the journal shows as started.
    ///
    /// A `PAID` pair with journal entries resumes from where it stopped:
    /// pending legs are applied via their idempotency key, completed
    /// legs are skipped, and the status flip is finished. Pairs whose
    /// settlement failed (e.g. seller shortfall) are left `PAID` for
    /// the dispute surface.
    pub fn reconcile(&self) -> ReconcileReport {
        let mut resumed = 0;
        for order in self.orders.snapshot() {
            if order.side != OrderSide::Buy || order.status != OrderStatus::Paid {
                continue;
            }
            let Some(sell_id) = order.counterparty_order else {
                continue;
            };
            let buy_tx = self.journal.get(TxId::settlement(order.id, OrderSide::Buy));
            let sell_tx = self.journal.get(TxId::settlement(sell_id, OrderSide::Sell));
            // Only resume settlements that were actually started.
            if buy_tx.is_none() && sell_tx.is_none() {
                continue;
            }
            // Failed legs mean the settlement was refused, not cut short.
            if [&buy_tx, &sell_tx]
                .iter()
                .any(|tx| tx.as_ref().is_some_and(|t| t.status == TxStatus::Failed))
            {
                continue;
            }
            let Ok(sell) = self.orders.get(sell_id) else {
                continue;
            };
            match self.settle_pair(&order, &sell, Utc::now()) {
                Ok(_) => {
                    resumed += 1;
                    tracing::info!(order = %order.id, "Settlement resumed by reconciliation");
                }
                Err(err) => {
                    tracing::warn!(order = %order.id, error = %err, "Reconciliation could not resume settlement");
                }
            }
        }
        ReconcileReport { resumed }
    }

    /// Execute (or resume) the balance transfer and commit the pair.
    fn settle_pair(
        &self,
        buy: &Order,
        sell: &Order,
        now: DateTime<Utc>,
    ) -> Result<(Order, Order)> {
        let _guard = self.settle_lock.lock().expect("settle lock poisoned");

        let buy_tx_id = TxId::settlement(buy.id, OrderSide::Buy);
        let sell_tx_id = TxId::settlement(sell.id, OrderSide::Sell);

        // Re-read under the lock: a concurrent confirm may have finished.
        let current = self.orders.get(buy.id)?;
        if current.status == OrderStatus::Completed {
            return Ok((current, self.orders.get(sell.id)?));
        }
        if current.status != OrderStatus::Paid {
            return Err(OpenpeerError::StaleOrderState {
                order: buy.id,
                expected: OrderStatus::Paid,
                actual: current.status,
            });
        }

        // The buyer must be able to receive before the seller is debited.
        let buyer = self.ledger.get(buy.owner)?;
        if !buyer.active {
            return Err(OpenpeerError::AccountDeactivated(buy.owner));
        }

        // Seller leg: debit.
        if !self.journal.is_completed(sell_tx_id) {
            self.journal.record(Transaction::pending(
                sell_tx_id,
                sell.owner,
                TxType::P2pSell,
                -sell.amount,
                Some(sell.id),
                None,
            ))?;
            match self
                .ledger
                .adjust_with_retry(sell.owner, -sell.amount, self.config.max_cas_retries)
            {
                Ok(_) => self.journal.set_status(sell_tx_id, TxStatus::Completed)?,
                Err(err) => {
                    self.journal.set_status(sell_tx_id, TxStatus::Failed)?;
                    tracing::warn!(
                        order = %buy.id,
                        seller = %sell.owner,
                        error = %err,
                        "Seller debit failed; pair stays PAID for review"
                    );
                    return Err(err);
                }
            }
        }

        // Buyer leg: credit. Cannot lack funds; only a deactivation that
        // slipped past the pre-flight lands in the error arm, which
        // unwinds the debit and cancels the pair so no funds are lost.
        if !self.journal.is_completed(buy_tx_id) {
            self.journal.record(Transaction::pending(
                buy_tx_id,
                buy.owner,
                TxType::P2pBuy,
                buy.amount,
                Some(buy.id),
                None,
            ))?;
            match self
                .ledger
                .adjust_with_retry(buy.owner, buy.amount, self.config.max_cas_retries)
            {
                Ok(_) => self.journal.set_status(buy_tx_id, TxStatus::Completed)?,
                Err(err) => {
                    self.journal.set_status(buy_tx_id, TxStatus::Failed)?;
                    self.unwind_debit(sell, sell_tx_id)?;
                    let (a, b) = self.orders.transition_pair(
                        buy.id,
                        OrderStatus::Paid,
                        OrderStatus::Cancelled,
                        None,
                    )?;
                    for leg in [&a, &b] {
                        self.bus.emit(EngineEvent::OrderCancelled {
                            order_id: leg.id,
                            disputed: true,
                        });
                    }
                    return Err(OpenpeerError::SettlementFailed {
                        order: buy.id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        // Commit: both legs are journaled COMPLETED, flip the pair.
        let (a, b) = match self.orders.transition_pair(
            buy.id,
            OrderStatus::Paid,
            OrderStatus::Completed,
            Some(now),
        ) {
            Ok(pair) => pair,
            // Another actor finished the flip; the settlement stands.
            Err(OpenpeerError::StaleOrderState {
                actual: OrderStatus::Completed,
                ..
            }) => (self.orders.get(buy.id)?, self.orders.get(sell.id)?),
            Err(err) => return Err(err),
        };

        tracing::info!(
            order = %buy.id,
            counterparty = %sell.id,
            amount = %buy.amount,
            buyer = %buy.owner,
            seller = %sell.owner,
            "Pair settled"
        );
        self.bus.emit(EngineEvent::OrderCompleted {
            order_id: a.id,
            counterparty_order: b.id,
        });
        self.bus.emit(EngineEvent::OrderCompleted {
            order_id: b.id,
            counterparty_order: a.id,
        });
        Ok(Self::normalize(a, b))
    }

    /// Reverse a committed seller debit with a new offsetting entry.
    /// The original entry stays COMPLETED — balances are never edited
    /// without a corresponding record.
    fn unwind_debit(&self, sell: &Order, sell_tx_id: TxId) -> Result<()> {
        let reversal = Transaction::pending(
            TxId::new(),
            sell.owner,
            TxType::P2pSell,
            sell.amount,
            Some(sell.id),
            Some(format!("reversal of {sell_tx_id}")),
        );
        let reversal_id = reversal.id;
        self.journal.record(reversal)?;
        self.ledger
            .adjust_with_retry(sell.owner, sell.amount, self.config.max_cas_retries)?;
        self.journal.set_status(reversal_id, TxStatus::Completed)?;
        Ok(())
    }

    /// Resolve both legs of a pair; either leg id may be passed in.
    fn legs(&self, order_id: OrderId) -> Result<(Order, Order)> {
        let order = self.orders.get(order_id)?;
        let Some(cp_id) = order.counterparty_order else {
            return Err(OpenpeerError::StaleOrderState {
                order: order_id,
                expected: OrderStatus::Matched,
                actual: order.status,
            });
        };
        let cp = self.orders.get(cp_id)?;
        Ok(match order.side {
            OrderSide::Buy => (order, cp),
            OrderSide::Sell => (cp, order),
        })
    }

    /// Order `(a, b)` as `(buy, sell)`.
    fn normalize(a: Order, b: Order) -> (Order, Order) {
        match a.side {
            OrderSide::Buy => (a, b),
            OrderSide::Sell => (b, a),
        }
    }
}
