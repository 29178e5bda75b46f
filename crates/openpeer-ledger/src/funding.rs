//! Deposit and withdrawal funding paths.
//!
//! Both paths follow the journal discipline: a `PENDING` entry is
//! recorded alongside the balance attempt and flipped to `COMPLETED` or
//! `FAILED` by the same operation — a failed withdrawal never leaves a
//! `PENDING` entry behind.

use openpeer_types::{
    AccountId, OpenpeerError, Result, Transaction, TxId, TxStatus, TxType,
    constants::DEFAULT_MAX_CAS_RETRIES,
};
use rust_decimal::Decimal;

use crate::{LedgerStore, TransactionJournal};

/// Credit external funds into an account.
///
/// `external_ref` carries the bank receipt or on-chain hash that
/// evidences the inbound transfer.
pub fn deposit(
    ledger: &LedgerStore,
    journal: &TransactionJournal,
    account_id: AccountId,
    amount: Decimal,
    external_ref: Option<String>,
) -> Result<Transaction> {
    apply_funding(ledger, journal, account_id, TxType::Deposit, amount, external_ref)
}

/// Debit funds out of an account.
///
/// # Errors
/// [`OpenpeerError::InsufficientFunds`] if the balance cannot cover the
/// amount; the journal entry is marked `FAILED` before the error
/// propagates.
pub fn withdraw(
    ledger: &LedgerStore,
    journal: &TransactionJournal,
    account_id: AccountId,
    amount: Decimal,
    external_ref: Option<String>,
) -> Result<Transaction> {
    apply_funding(ledger, journal, account_id, TxType::Withdraw, amount, external_ref)
}

fn apply_funding(
    ledger: &LedgerStore,
    journal: &TransactionJournal,
    account_id: AccountId,
    tx_type: TxType,
    amount: Decimal,
    external_ref: Option<String>,
) -> Result<Transaction> {
    if amount <= Decimal::ZERO {
        return Err(OpenpeerError::InvalidAmount { amount });
    }
    // The account must exist before we journal anything against it.
    let _ = ledger.get(account_id)?;

    let delta = match tx_type {
        TxType::Withdraw => -amount,
        _ => amount,
    };
    let mut tx = Transaction::pending(
        TxId::new(),
        account_id,
        tx_type,
        delta,
        None,
        external_ref,
    );
    journal.record(tx.clone())?;

    match ledger.adjust_with_retry(account_id, delta, DEFAULT_MAX_CAS_RETRIES) {
        Ok(new_balance) => {
            journal.set_status(tx.id, TxStatus::Completed)?;
            tx.status = TxStatus::Completed;
            tracing::info!(
                account = %account_id,
                tx = %tx.id,
                kind = %tx_type,
                amount = %amount,
                new_balance = %new_balance,
                "Funding applied"
            );
            Ok(tx)
        }
        Err(err) => {
            journal.set_status(tx.id, TxStatus::Failed)?;
            tracing::warn!(
                account = %account_id,
                tx = %tx.id,
                kind = %tx_type,
                amount = %amount,
                error = %err,
                "Funding failed"
            );
            Err(err)
        }
    }
}
