//! Account-balance storage with optimistic-concurrency mutation.
//!
//! All mutations go through [`LedgerStore::adjust_balance`]: a write
//! succeeds only if the stored balance still equals the caller's
//! expected value, otherwise the caller lost the race, re-reads, and
//! retries. Either the full update commits or the balance is unchanged.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use openpeer_types::{
    Account, AccountId, EngineEvent, EventBus, OpenpeerError, Result,
};
use rust_decimal::Decimal;

/// Source of truth for all account balances.
///
/// Shared via `Arc` across concurrent sessions; the interior lock keeps
/// each compare-and-swap atomic with respect to every other write on
/// the same account.
pub struct LedgerStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
    bus: EventBus,
}

impl LedgerStore {
    /// Create an empty ledger publishing `balance.changed` on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Open a new active account with the given opening balance.
    pub fn open_account(&self, initial_balance: Decimal) -> Result<AccountId> {
        if initial_balance < Decimal::ZERO {
            return Err(OpenpeerError::InvalidAmount {
                amount: initial_balance,
            });
        }
        let account = Account::new(initial_balance);
        let id = account.id;
        self.accounts
            .write()
            .expect("ledger lock poisoned")
            .insert(id, account);
        Ok(id)
    }

    /// Fetch a snapshot of an account.
    pub fn get(&self, account_id: AccountId) -> Result<Account> {
        self.accounts
            .read()
            .expect("ledger lock poisoned")
            .get(&account_id)
            .cloned()
            .ok_or(OpenpeerError::AccountNotFound(account_id))
    }

    /// Current balance of an account.
    pub fn balance(&self, account_id: AccountId) -> Result<Decimal> {
        self.get(account_id).map(|a| a.balance)
    }

    /// Deactivate an account. Accounts are never deleted.
    pub fn deactivate(&self, account_id: AccountId) -> Result<()> {
        let mut accounts = self.accounts.write().expect("ledger lock poisoned");
        let account = accounts
            .get_mut(&account_id)
            .ok_or(OpenpeerError::AccountNotFound(account_id))?;
        account.active = false;
        account.updated_at = Utc::now();
        Ok(())
    }

    /// Conditionally adjust a balance (optimistic concurrency).
    ///
    /// Succeeds only if the stored balance equals `expected` at the
    /// moment of write; the new balance must not go negative. Bumps the
    /// account version and emits `balance.changed` after commit.
    ///
    /// # Errors
    /// - [`OpenpeerError::BalanceConflict`] if the stored balance moved —
    ///   re-read and retry
    /// - [`OpenpeerError::InsufficientFunds`] if `expected + delta < 0`
    /// - [`OpenpeerError::AccountNotFound`] / [`OpenpeerError::AccountDeactivated`]
    pub fn adjust_balance(
        &self,
        account_id: AccountId,
        delta: Decimal,
        expected: Decimal,
    ) -> Result<Decimal> {
        let new_balance = {
            let mut accounts = self.accounts.write().expect("ledger lock poisoned");
            let account = accounts
                .get_mut(&account_id)
                .ok_or(OpenpeerError::AccountNotFound(account_id))?;

            if !account.active {
                return Err(OpenpeerError::AccountDeactivated(account_id));
            }
            if account.balance != expected {
                return Err(OpenpeerError::BalanceConflict {
                    account: account_id,
                    expected,
                    actual: account.balance,
                });
            }

            let new_balance = expected + delta;
            if new_balance < Decimal::ZERO {
                return Err(OpenpeerError::InsufficientFunds {
                    needed: delta.abs(),
                    available: expected,
                });
            }

            account.balance = new_balance;
            account.version += 1;
            account.updated_at = Utc::now();
            new_balance
        };

        tracing::debug!(
            account = %account_id,
            delta = %delta,
            new_balance = %new_balance,
            "Balance adjusted"
        );
        self.bus.emit(EngineEvent::BalanceChanged {
            account_id,
            new_balance,
        });
        Ok(new_balance)
    }

    /// Read-then-CAS loop bounded at `max_retries` attempts.
    ///
    /// Conflicts are retried with a fresh read; every other error
    /// (insufficient funds, missing account) propagates immediately.
    pub fn adjust_with_retry(
        &self,
        account_id: AccountId,
        delta: Decimal,
        max_retries: u32,
    ) -> Result<Decimal> {
        let mut last_err = None;
        for _ in 0..max_retries.max(1) {
            let expected = self.balance(account_id)?;
            match self.adjust_balance(account_id, delta, expected) {
                Ok(new_balance) => return Ok(new_balance),
                Err(err) if err.is_conflict() => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            OpenpeerError::Internal("adjust_with_retry: no attempt made".into())
        }))
    }

    /// Number of accounts in the ledger.
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.accounts.read().expect("ledger lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ledger() -> LedgerStore {
        LedgerStore::new(EventBus::new(64))
    }

    #[test]
    fn open_and_read_account() {
        let store = ledger();
        let id = store.open_account(Decimal::new(1000, 0)).unwrap();
        assert_eq!(store.balance(id).unwrap(), Decimal::new(1000, 0));
        assert_eq!(store.account_count(), 1);
    }

    #[test]
    fn negative_opening_balance_rejected() {
        let store = ledger();
        let err = store.open_account(Decimal::new(-1, 0)).unwrap_err();
        assert!(matches!(err, OpenpeerError::InvalidAmount { .. }));
    }

    #[test]
    fn adjust_with_matching_expectation_succeeds() {
        let store = ledger();
        let id = store.open_account(Decimal::new(100, 0)).unwrap();

        let new = store
            .adjust_balance(id, Decimal::new(50, 0), Decimal::new(100, 0))
            .unwrap();
        assert_eq!(new, Decimal::new(150, 0));
        assert_eq!(store.get(id).unwrap().version, 1);
    }

    #[test]
    fn stale_expectation_conflicts() {
        let store = ledger();
        let id = store.open_account(Decimal::new(100, 0)).unwrap();

        let err = store
            .adjust_balance(id, Decimal::new(10, 0), Decimal::new(99, 0))
            .unwrap_err();
        assert!(matches!(err, OpenpeerError::BalanceConflict { .. }));
        // Balance unchanged
        assert_eq!(store.balance(id).unwrap(), Decimal::new(100, 0));
        assert_eq!(store.get(id).unwrap().version, 0);
    }

    #[test]
    fn overdraft_rejected() {
        let store = ledger();
        let id = store.open_account(Decimal::new(30, 0)).unwrap();

        let err = store
            .adjust_balance(id, Decimal::new(-100, 0), Decimal::new(30, 0))
            .unwrap_err();
        assert!(matches!(err, OpenpeerError::InsufficientFunds { .. }));
        assert_eq!(store.balance(id).unwrap(), Decimal::new(30, 0));
    }

    #[test]
    fn deactivated_account_rejects_adjustment() {
        let store = ledger();
        let id = store.open_account(Decimal::new(10, 0)).unwrap();
        store.deactivate(id).unwrap();

        let err = store
            .adjust_balance(id, Decimal::ONE, Decimal::new(10, 0))
            .unwrap_err();
        assert!(matches!(err, OpenpeerError::AccountDeactivated(_)));
    }

    #[test]
    fn adjustment_emits_balance_changed() {
        let bus = EventBus::new(16);
        let store = LedgerStore::new(bus.clone());
        let mut rx = bus.subscribe();
        let id = store.open_account(Decimal::new(5, 0)).unwrap();

        store
            .adjust_balance(id, Decimal::ONE, Decimal::new(5, 0))
            .unwrap();

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.event.name(), "balance.changed");
        match envelope.event {
            EngineEvent::BalanceChanged { new_balance, .. } => {
                assert_eq!(new_balance, Decimal::new(6, 0));
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn retry_helper_survives_interleaved_writers() {
        let store = Arc::new(ledger());
        let id = store.open_account(Decimal::ZERO).unwrap();

        // 8 threads each credit 1, fifty times: all writes must land.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.adjust_with_retry(id, Decimal::ONE, 100).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.balance(id).unwrap(), Decimal::new(400, 0));
        assert_eq!(store.get(id).unwrap().version, 400);
    }

    #[test]
    fn retry_helper_does_not_retry_insufficient_funds() {
        let store = ledger();
        let id = store.open_account(Decimal::new(30, 0)).unwrap();

        let err = store
            .adjust_with_retry(id, Decimal::new(-100, 0), 5)
            .unwrap_err();
        assert!(matches!(err, OpenpeerError::InsufficientFunds { .. }));
    }

    #[test]
    fn missing_account_errors() {
        let store = ledger();
        let err = store.balance(AccountId::new()).unwrap_err();
        assert!(matches!(err, OpenpeerError::AccountNotFound(_)));
    }
}
