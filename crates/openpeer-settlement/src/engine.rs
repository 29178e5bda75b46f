//! The engine facade consumed by the API layer.
//!
//! Wires the ledger, journal, order store, matcher, settlement workflow,
//! and expiry sweeper together behind one handle. The facade is cheap to
//! share: every operation takes `&self` and all interior state is behind
//! the component stores' own locks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use openpeer_ledger::{LedgerStore, TransactionJournal, deposit, withdraw};
use openpeer_orders::{MatchEngine, MatchOutcome, OrderStore};
use openpeer_types::{
    Account, AccountId, BankDetails, EngineConfig, EngineEvent, EventBus, EventEnvelope,
    OpenpeerError, Order, OrderId, OrderSide, Result, Transaction,
};
use rust_decimal::Decimal;

use crate::sweeper::{ExpirySweeper, SweepReport};
use crate::workflow::{ReconcileReport, Settlement};

/// One in-process P2P exchange engine.
pub struct P2pEngine {
    bus: EventBus,
    ledger: Arc<LedgerStore>,
    journal: Arc<TransactionJournal>,
    orders: Arc<OrderStore>,
    matcher: MatchEngine,
    settlement: Settlement,
    sweeper: Arc<ExpirySweeper>,
}

impl P2pEngine {
    /// Build an engine with the given tuning.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let bus = EventBus::new(config.event_capacity);
        let ledger = Arc::new(LedgerStore::new(bus.clone()));
        let journal = Arc::new(TransactionJournal::new());
        let orders = Arc::new(OrderStore::new());
        let matcher = MatchEngine::new(Arc::clone(&orders), bus.clone(), config.clone());
        let settlement = Settlement::new(
            Arc::clone(&ledger),
            Arc::clone(&journal),
            Arc::clone(&orders),
            bus.clone(),
            config.clone(),
        );
        let sweeper = Arc::new(ExpirySweeper::new(
            Arc::clone(&orders),
            bus.clone(),
            config,
        ));
        Self {
            bus,
            ledger,
            journal,
            orders,
            matcher,
            settlement,
            sweeper,
        }
    }

    // --- accounts and funding ---

    /// Open an account with an opening balance.
    pub fn open_account(&self, initial_balance: Decimal) -> Result<AccountId> {
        self.ledger.open_account(initial_balance)
    }

    /// Account snapshot.
    pub fn account(&self, account_id: AccountId) -> Result<Account> {
        self.ledger.get(account_id)
    }

    /// Current balance.
    pub fn balance(&self, account_id: AccountId) -> Result<Decimal> {
        self.ledger.balance(account_id)
    }

    /// Deactivate an account; its history stays queryable.
    pub fn deactivate_account(&self, account_id: AccountId) -> Result<()> {
        self.ledger.deactivate(account_id)
    }

    /// Credit external funds into an account.
    pub fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        external_ref: Option<String>,
    ) -> Result<Transaction> {
        deposit(&self.ledger, &self.journal, account_id, amount, external_ref)
    }

    /// Debit funds out of an account.
    pub fn withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        external_ref: Option<String>,
    ) -> Result<Transaction> {
        withdraw(&self.ledger, &self.journal, account_id, amount, external_ref)
    }

    /// Full transaction history for an account, oldest first.
    #[must_use]
    pub fn transactions(&self, account_id: AccountId) -> Vec<Transaction> {
        self.journal.for_account(account_id)
    }

    // --- order lifecycle ---

    /// Place an order and immediately try to match it.
    ///
    /// SELL orders require the seller's balance to cover the amount at
    /// placement time (it is checked again at settlement). A match
    /// contention on the eager attempt degrades to `Unmatched` — the
    /// order stays `OPEN` and a later attempt or counter-order picks it
    /// up.
    pub fn create_order(
        &self,
        owner: AccountId,
        side: OrderSide,
        amount: Decimal,
        bank_details: Option<BankDetails>,
    ) -> Result<(Order, MatchOutcome)> {
        let account = self.ledger.get(owner)?;
        if !account.active {
            return Err(OpenpeerError::AccountDeactivated(owner));
        }
        if side == OrderSide::Sell && account.balance < amount {
            return Err(OpenpeerError::InsufficientFunds {
                needed: amount,
                available: account.balance,
            });
        }

        let order = self.orders.create_order(owner, side, amount, bank_details)?;
        tracing::info!(
            order = %order.id,
            owner = %owner,
            side = %order.side,
            amount = %order.amount,
            "Order created"
        );

        let outcome = match self.matcher.attempt_match(order.id) {
            Ok(outcome) => outcome,
            Err(OpenpeerError::MatchContention { attempts, .. }) => {
                tracing::warn!(
                    order = %order.id,
                    attempts,
                    "Eager match hit contention; order stays open"
                );
                MatchOutcome::Unmatched
            }
            Err(err) => return Err(err),
        };
        let order = self.orders.get(order.id)?;
        Ok((order, outcome))
    }

    /// Retry matching an `OPEN` order against the current pool.
    pub fn attempt_match(&self, order_id: OrderId) -> Result<MatchOutcome> {
        self.matcher.attempt_match(order_id)
    }

    /// Order snapshot.
    pub fn order(&self, order_id: OrderId) -> Result<Order> {
        self.orders.get(order_id)
    }

    /// The account's active order, if it has one.
    #[must_use]
    pub fn active_order(&self, account_id: AccountId) -> Option<Order> {
        self.orders.active_order(account_id)
    }

    /// Cancel an order (and its counterpart when already matched).
    pub fn cancel(&self, order_id: OrderId, actor: AccountId) -> Result<Vec<Order>> {
        let cancelled = self.orders.cancel(order_id, actor)?;
        for leg in &cancelled {
            self.bus.emit(EngineEvent::OrderCancelled {
                order_id: leg.id,
                disputed: false,
            });
        }
        Ok(cancelled)
    }

    // --- settlement handshake ---

    /// SELL leg declares the bank transfer sent.
    pub fn mark_paid(&self, order_id: OrderId, actor: AccountId) -> Result<(Order, Order)> {
        self.settlement.mark_paid(order_id, actor)
    }

    /// BUY leg confirms receipt; executes the balance transfer.
    pub fn confirm_received(&self, order_id: OrderId, actor: AccountId) -> Result<(Order, Order)> {
        self.settlement.confirm_received(order_id, actor)
    }

    /// BUY leg disputes the payment claim.
    pub fn reject(&self, order_id: OrderId, actor: AccountId) -> Result<(Order, Order)> {
        self.settlement.reject(order_id, actor)
    }

    // --- maintenance ---

    /// One expiry pass against the given clock.
    #[must_use]
    pub fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweeper.sweep_once(now)
    }

    /// Spawn the periodic expiry sweeper on the current runtime.
    #[must_use]
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let sweeper = Arc::clone(&self.sweeper);
        tokio::spawn(async move { sweeper.run().await })
    }

    /// Finish settlements interrupted before their commit marker.
    /// Run once at startup, before accepting traffic.
    pub fn reconcile(&self) -> ReconcileReport {
        self.settlement.reconcile()
    }

    /// Subscribe to lifecycle and balance events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }
}

impl Default for P2pEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
