//! # openpeer-ledger
//!
//! **Ledger Store**: durable account-balance state with atomic
//! conditional updates, plus the append-only transaction journal.
//!
//! ## Architecture
//!
//! 1. **LedgerStore**: per-account balances; the *only* write path is
//!    [`LedgerStore::adjust_balance`] — a compare-and-swap on the
//!    previous balance, so concurrent settlement attempts serialize at
//!    the storage layer instead of via in-process locks.
//! 2. **TransactionJournal**: append-only record of every balance
//!    effect; settlement entries use deterministic [`TxId`]s as
//!    idempotency keys, which makes replays detectable.
//! 3. **Funding paths**: [`deposit`] / [`withdraw`] — journal `PENDING`,
//!    apply the balance change, flip to `COMPLETED` or `FAILED`.
//!
//! [`TxId`]: openpeer_types::TxId

pub mod funding;
pub mod journal;
pub mod store;

pub use funding::{deposit, withdraw};
pub use journal::TransactionJournal;
pub use store::LedgerStore;
