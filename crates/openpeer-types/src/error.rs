//! Error types for the OpenPeer engine.
//!
//! All errors use the `PP_ERR_` prefix convention for easy grepping in
//! logs. Error codes are grouped by subsystem:
//! - 1xx: Order / validation errors
//! - 2xx: Ledger / balance errors
//! - 3xx: Matching errors
//! - 4xx: Settlement errors
//! - 9xx: General / internal errors
//!
//! Conflict-class errors (`StaleOrderState`, `BalanceConflict`) mean a
//! CAS race was lost: the caller re-reads state and retries or reports
//! "already handled". Everything else propagates unmodified so the UI
//! collaborator can render an appropriate message.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AccountId, OrderId, OrderStatus, TxId};

/// Central error enum for all OpenPeer operations.
#[derive(Debug, Error)]
pub enum OpenpeerError {
    // =================================================================
    // Order / Validation Errors (1xx)
    // =================================================================
    /// The requested order was not found in the store.
    #[error("PP_ERR_100: Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Order amount must be strictly positive.
    #[error("PP_ERR_101: Invalid order amount: {amount}")]
    InvalidAmount { amount: Decimal },

    /// The owner already holds a non-terminal order.
    #[error("PP_ERR_102: Account {account} already has an active order: {existing}")]
    ActiveOrderExists {
        account: AccountId,
        existing: OrderId,
    },

    /// Lost a compare-and-swap race on the order's status.
    #[error("PP_ERR_103: Stale order state for {order}: expected {expected}, found {actual}")]
    StaleOrderState {
        order: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// Once payment is claimed, the payer cannot cancel; only the
    /// recipient's explicit reject path unwinds a PAID pair.
    #[error("PP_ERR_104: Order {0} is PAID and cannot be cancelled by the payer")]
    CannotCancelPaidOrder(OrderId),

    /// The actor is not a party to the order (or is on the wrong leg).
    #[error("PP_ERR_105: Account {account} may not perform this action on order {order}")]
    NotOrderParty { order: OrderId, account: AccountId },

    /// SELL orders must carry bank-settlement details.
    #[error("PP_ERR_106: SELL order requires bank details")]
    MissingBankDetails,

    /// The pair's settlement deadline has elapsed.
    #[error("PP_ERR_107: Deadline expired for order {0}; awaiting expiry sweep")]
    DeadlineExpired(OrderId),

    // =================================================================
    // Ledger / Balance Errors (2xx)
    // =================================================================
    /// Not enough balance to perform the operation.
    #[error("PP_ERR_200: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    /// Lost a compare-and-swap race on the account balance.
    #[error("PP_ERR_201: Balance conflict on account {account}: expected {expected}, found {actual}")]
    BalanceConflict {
        account: AccountId,
        expected: Decimal,
        actual: Decimal,
    },

    /// No such account.
    #[error("PP_ERR_202: Account not found: {0}")]
    AccountNotFound(AccountId),

    /// The account has been deactivated; funding operations are blocked.
    #[error("PP_ERR_203: Account deactivated: {0}")]
    AccountDeactivated(AccountId),

    // =================================================================
    // Matching Errors (3xx)
    // =================================================================
    /// The bounded CAS retry budget was exhausted under contention.
    #[error("PP_ERR_300: Match contention on order {order} after {attempts} attempts")]
    MatchContention { order: OrderId, attempts: u32 },

    // =================================================================
    // Settlement Errors (4xx)
    // =================================================================
    /// A settlement transaction with this idempotency key was already
    /// applied (replay / double-confirm guard).
    #[error("PP_ERR_400: Transaction already applied: {0}")]
    TransactionAlreadyApplied(TxId),

    /// The settlement could not be completed.
    #[error("PP_ERR_401: Settlement failed for order {order}: {reason}")]
    SettlementFailed { order: OrderId, reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("PP_ERR_900: Internal error: {0}")]
    Internal(String),
}

impl OpenpeerError {
    /// Whether the caller may re-read state and retry (lost CAS race).
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StaleOrderState { .. } | Self::BalanceConflict { .. }
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, OpenpeerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = OpenpeerError::OrderNotFound(OrderId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("PP_ERR_100"), "Got: {msg}");
    }

    #[test]
    fn insufficient_funds_display() {
        let err = OpenpeerError::InsufficientFunds {
            needed: Decimal::new(100, 0),
            available: Decimal::new(30, 0),
        };
        let msg = format!("{err}");
        assert!(msg.contains("PP_ERR_200"));
        assert!(msg.contains("100"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn conflict_classification() {
        let stale = OpenpeerError::StaleOrderState {
            order: OrderId::new(),
            expected: OrderStatus::Open,
            actual: OrderStatus::Matched,
        };
        assert!(stale.is_conflict());

        let conflict = OpenpeerError::BalanceConflict {
            account: AccountId::new(),
            expected: Decimal::new(10, 0),
            actual: Decimal::new(20, 0),
        };
        assert!(conflict.is_conflict());

        let terminal = OpenpeerError::MissingBankDetails;
        assert!(!terminal.is_conflict());
    }

    #[test]
    fn all_errors_have_pp_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(OpenpeerError::MissingBankDetails),
            Box::new(OpenpeerError::CannotCancelPaidOrder(OrderId::new())),
            Box::new(OpenpeerError::AccountNotFound(AccountId::new())),
            Box::new(OpenpeerError::TransactionAlreadyApplied(TxId::new())),
            Box::new(OpenpeerError::Internal("test".into())),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("PP_ERR_"),
                "Error missing PP_ERR_ prefix: {msg}"
            );
        }
    }
}
