//! Store Contract
//!
//! The persistent store collaborator the engine runs against. A store hands
//! out scoped transaction handles; every read and write of a transfer goes
//! through one handle and becomes visible only when that handle commits.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::{Account, AccountId, AccountUpdate, NewTransaction, Transaction};
use crate::error::LedgerError;

/// Scoped handle to one open store transaction
///
/// Dropping a handle without committing discards its effects.
#[async_trait]
pub trait LedgerTx: Send {
    /// Append a ledger entry. Fails with `AccountNotFound` if an internal
    /// side references a missing account.
    async fn insert_transaction(
        &mut self,
        new: &NewTransaction,
    ) -> Result<Transaction, LedgerError>;

    /// Read one account and hold an exclusive row lock until commit/rollback.
    /// Blocks while another open handle holds the lock.
    async fn select_account_for_update(
        &mut self,
        id: AccountId,
    ) -> Result<Option<Account>, LedgerError>;

    /// `balance = balance + delta` as a single locked read-modify-write
    async fn increment_balance(
        &mut self,
        id: AccountId,
        delta: Decimal,
    ) -> Result<Option<Account>, LedgerError>;

    /// Overwrite the set fields of `update`, taking the row lock
    async fn update_account(
        &mut self,
        id: AccountId,
        update: &AccountUpdate,
    ) -> Result<Option<Account>, LedgerError>;

    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;

    /// Roll back a handle whose work future was dropped mid-call (timeout or
    /// cancellation). Must not wait for a statement still blocked on a row
    /// lock held elsewhere.
    async fn abandon(self) -> Result<(), LedgerError>;
}

/// Factory for scoped handles
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx + 'static;

    /// Open a new independent transaction
    async fn begin(&self) -> Result<Self::Tx, LedgerError>;
}
