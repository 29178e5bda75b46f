//! Ledger transaction (journal entry) types.
//!
//! Every balance effect leaves a journal entry. A `COMPLETED` entry's
//! amount has been reflected exactly once in the owning account's
//! balance; reversal requires a new offsetting entry, never an in-place
//! balance edit without a record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, OrderId, TxId};

/// What kind of balance movement this entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Deposit,
    Withdraw,
    P2pBuy,
    P2pSell,
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "DEPOSIT"),
            Self::Withdraw => write!(f, "WITHDRAW"),
            Self::P2pBuy => write!(f, "P2P_BUY"),
            Self::P2pSell => write!(f, "P2P_SELL"),
        }
    }
}

/// Lifecycle status of a journal entry.
///
/// Created `PENDING` alongside the mutation attempt and flipped to
/// `COMPLETED` or `FAILED` by the same operation; immutable afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A single append-only journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub account_id: AccountId,
    pub tx_type: TxType,
    /// Signed: positive credits the account, negative debits it.
    pub amount: Decimal,
    pub status: TxStatus,
    /// Set for settlement legs; links back to the order that caused it.
    pub order_id: Option<OrderId>,
    /// Bank receipt reference or on-chain hash, when one exists.
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a fresh `PENDING` entry.
    #[must_use]
    pub fn pending(
        id: TxId,
        account_id: AccountId,
        tx_type: TxType,
        amount: Decimal,
        order_id: Option<OrderId>,
        external_ref: Option<String>,
    ) -> Self {
        Self {
            id,
            account_id,
            tx_type,
            amount,
            status: TxStatus::Pending,
            order_id,
            external_ref,
            created_at: Utc::now(),
        }
    }
}
