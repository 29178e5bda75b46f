//! Account model: a user's internal USDT-pegged balance.
//!
//! Balances are mutated only through the ledger store's conditional
//! update; the `version` counter backs optimistic concurrency and every
//! successful write bumps it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// A balance account. Never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Invariant: never negative.
    pub balance: Decimal,
    /// Monotonic write counter for optimistic locking.
    pub version: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a fresh active account with the given opening balance.
    #[must_use]
    pub fn new(initial_balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new(),
            balance: initial_balance,
            version: 0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
