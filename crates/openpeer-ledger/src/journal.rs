//! Append-only transaction journal with settlement idempotency.
//!
//! Settlement legs derive their [`TxId`] deterministically from the
//! order they settle, so recording the same settlement twice collides
//! here and surfaces [`OpenpeerError::TransactionAlreadyApplied`]
//! instead of double-crediting a balance. Entries flip `PENDING` →
//! `COMPLETED`/`FAILED` once and are immutable afterward; a reversal is
//! a new offsetting entry.
//!
//! [`TxId`]: openpeer_types::TxId

use std::collections::HashMap;
use std::sync::RwLock;

use openpeer_types::{
    AccountId, OpenpeerError, OrderId, Result, Transaction, TxId, TxStatus,
};

/// The append-only journal of every balance effect.
pub struct TransactionJournal {
    entries: RwLock<HashMap<TxId, Transaction>>,
}

impl TransactionJournal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record a fresh `PENDING` entry.
    ///
    /// Returns `true` when the caller claimed the entry. Collision rules
    /// for an existing entry with the same id:
    /// - `COMPLETED` → [`OpenpeerError::TransactionAlreadyApplied`] (the
    ///   balance effect already landed exactly once)
    /// - `PENDING` → `Ok(false)`: an in-flight attempt owns it
    /// - `FAILED` → replaced (a failed attempt may be retried)
    pub fn record(&self, tx: Transaction) -> Result<bool> {
        let mut entries = self.entries.write().expect("journal lock poisoned");
        match entries.get(&tx.id).map(|existing| existing.status) {
            Some(TxStatus::Completed) => Err(OpenpeerError::TransactionAlreadyApplied(tx.id)),
            Some(TxStatus::Pending) => Ok(false),
            Some(TxStatus::Failed) | None => {
                entries.insert(tx.id, tx);
                Ok(true)
            }
        }
    }

    /// Flip a `PENDING` entry to `COMPLETED` or `FAILED`.
    ///
    /// Setting the status an entry already has is a no-op (idempotent);
    /// any other flip of a resolved entry is refused.
    pub fn set_status(&self, tx_id: TxId, status: TxStatus) -> Result<()> {
        let mut entries = self.entries.write().expect("journal lock poisoned");
        let tx = entries
            .get_mut(&tx_id)
            .ok_or_else(|| OpenpeerError::Internal(format!("unknown journal entry {tx_id}")))?;
        match tx.status {
            TxStatus::Pending => {
                tx.status = status;
                Ok(())
            }
            current if current == status => Ok(()),
            current => Err(OpenpeerError::Internal(format!(
                "journal entry {tx_id} is {current}, refusing flip to {status}"
            ))),
        }
    }

    /// Look up an entry by id.
    #[must_use]
    pub fn get(&self, tx_id: TxId) -> Option<Transaction> {
        self.entries
            .read()
            .expect("journal lock poisoned")
            .get(&tx_id)
            .cloned()
    }

    /// Whether an entry exists and has been applied to a balance.
    #[must_use]
    pub fn is_completed(&self, tx_id: TxId) -> bool {
        self.get(tx_id)
            .is_some_and(|tx| tx.status == TxStatus::Completed)
    }

    /// All entries linked to an order (settlement legs).
    #[must_use]
    pub fn for_order(&self, order_id: OrderId) -> Vec<Transaction> {
        self.entries
            .read()
            .expect("journal lock poisoned")
            .values()
            .filter(|tx| tx.order_id == Some(order_id))
            .cloned()
            .collect()
    }

    /// All entries for an account, oldest first.
    #[must_use]
    pub fn for_account(&self, account_id: AccountId) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self
            .entries
            .read()
            .expect("journal lock poisoned")
            .values()
            .filter(|tx| tx.account_id == account_id)
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.created_at);
        txs
    }

    /// All entries still `PENDING` — the reconciliation worklist.
    #[must_use]
    pub fn pending(&self) -> Vec<Transaction> {
        self.entries
            .read()
            .expect("journal lock poisoned")
            .values()
            .filter(|tx| tx.status == TxStatus::Pending)
            .cloned()
            .collect()
    }

    /// Number of journal entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("journal lock poisoned").len()
    }

    /// Whether the journal is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("journal lock poisoned").is_empty()
    }
}

impl Default for TransactionJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use openpeer_types::{OrderSide, TxType};
    use rust_decimal::Decimal;

    use super::*;

    fn settlement_tx(order_id: OrderId, leg: OrderSide) -> Transaction {
        let (tx_type, amount) = match leg {
            OrderSide::Buy => (TxType::P2pBuy, Decimal::new(100, 0)),
            OrderSide::Sell => (TxType::P2pSell, Decimal::new(-100, 0)),
        };
        Transaction::pending(
            TxId::settlement(order_id, leg),
            AccountId::new(),
            tx_type,
            amount,
            Some(order_id),
            None,
        )
    }

    #[test]
    fn record_and_complete() {
        let journal = TransactionJournal::new();
        let order = OrderId::new();
        let tx = settlement_tx(order, OrderSide::Buy);
        let id = tx.id;

        journal.record(tx).unwrap();
        assert!(!journal.is_completed(id));

        journal.set_status(id, TxStatus::Completed).unwrap();
        assert!(journal.is_completed(id));
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn completed_entry_blocks_replay() {
        let journal = TransactionJournal::new();
        let order = OrderId::new();
        let tx = settlement_tx(order, OrderSide::Buy);
        journal.record(tx.clone()).unwrap();
        journal.set_status(tx.id, TxStatus::Completed).unwrap();

        let err = journal
            .record(settlement_tx(order, OrderSide::Buy))
            .unwrap_err();
        assert!(
            matches!(err, OpenpeerError::TransactionAlreadyApplied(id) if id == tx.id),
            "Expected TransactionAlreadyApplied, got: {err:?}"
        );
    }

    #[test]
    fn pending_entry_is_not_replaced() {
        let journal = TransactionJournal::new();
        let order = OrderId::new();
        let tx = settlement_tx(order, OrderSide::Sell);
        let created = tx.created_at;
        assert!(journal.record(tx).unwrap());

        // Second record with the same deterministic id keeps the original
        // and reports the entry as already claimed.
        let claimed = journal.record(settlement_tx(order, OrderSide::Sell)).unwrap();
        assert!(!claimed);
        assert_eq!(journal.len(), 1);
        let stored = journal
            .get(TxId::settlement(order, OrderSide::Sell))
            .unwrap();
        assert_eq!(stored.created_at, created);
    }

    #[test]
    fn failed_entry_may_be_retried() {
        let journal = TransactionJournal::new();
        let order = OrderId::new();
        let tx = settlement_tx(order, OrderSide::Sell);
        let id = tx.id;
        journal.record(tx).unwrap();
        journal.set_status(id, TxStatus::Failed).unwrap();

        journal.record(settlement_tx(order, OrderSide::Sell)).unwrap();
        assert_eq!(journal.get(id).unwrap().status, TxStatus::Pending);
    }

    #[test]
    fn resolved_entries_are_immutable() {
        let journal = TransactionJournal::new();
        let order = OrderId::new();
        let tx = settlement_tx(order, OrderSide::Buy);
        let id = tx.id;
        journal.record(tx).unwrap();
        journal.set_status(id, TxStatus::Completed).unwrap();

        // Idempotent repeat is fine; a different flip is refused.
        journal.set_status(id, TxStatus::Completed).unwrap();
        let err = journal.set_status(id, TxStatus::Failed).unwrap_err();
        assert!(matches!(err, OpenpeerError::Internal(_)));
    }

    #[test]
    fn order_and_pending_lookups() {
        let journal = TransactionJournal::new();
        let order = OrderId::new();
        journal.record(settlement_tx(order, OrderSide::Buy)).unwrap();
        journal.record(settlement_tx(order, OrderSide::Sell)).unwrap();

        assert_eq!(journal.for_order(order).len(), 2);
        assert_eq!(journal.pending().len(), 2);

        journal
            .set_status(TxId::settlement(order, OrderSide::Buy), TxStatus::Completed)
            .unwrap();
        assert_eq!(journal.pending().len(), 1);
    }
}
