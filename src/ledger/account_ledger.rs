//! Account Ledger
//!
//! Primitive operations on a single account row. Every operation takes the
//! scoped handle of the enclosing atomic unit, so a balance can only change
//! inside one.

use rust_decimal::Decimal;
use tracing::debug;

use super::store::LedgerTx;
use super::types::{Account, AccountId, AccountUpdate};
use crate::error::LedgerError;

/// Account row operations
pub struct AccountLedger;

impl AccountLedger {
    /// Read one account and hold its exclusive lock until the unit ends.
    ///
    /// Blocks while another in-flight unit holds the lock.
    pub async fn lock_for_update<T: LedgerTx>(
        tx: &mut T,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        let account = tx
            .select_account_for_update(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))?;
        debug!(account_id = %id, balance = %account.balance, "Account locked");
        Ok(account)
    }

    /// Add `delta` (either sign) to the stored balance in one locked
    /// read-modify-write and return the new row.
    pub async fn add_balance<T: LedgerTx>(
        tx: &mut T,
        id: AccountId,
        delta: Decimal,
    ) -> Result<Account, LedgerError> {
        let account = tx
            .increment_balance(id, delta)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))?;
        debug!(
            account_id = %id,
            delta = %delta,
            balance = %account.balance,
            "Account balance updated"
        );
        Ok(account)
    }

    /// Replace the set fields of `update` (status administration, not transfers)
    pub async fn overwrite<T: LedgerTx>(
        tx: &mut T,
        id: AccountId,
        update: &AccountUpdate,
    ) -> Result<Account, LedgerError> {
        if update.is_empty() {
            return Self::lock_for_update(tx, id).await;
        }

        let account = tx
            .update_account(id, update)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))?;
        debug!(
            account_id = %id,
            active = account.active,
            locked = account.locked,
            "Account overwritten"
        );
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedgerStore;
    use crate::ledger::store::LedgerStore;

    #[tokio::test]
    async fn test_lock_for_update_returns_row() {
        let store = MemoryLedgerStore::new();
        let acc = store.open_account(4, "EUR", Decimal::from(12));

        let mut tx = store.begin().await.unwrap();
        let locked = AccountLedger::lock_for_update(&mut tx, acc.id)
            .await
            .unwrap();
        assert_eq!(locked, acc);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_account_is_not_found() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let missing = AccountId::new(999);

        let err = AccountLedger::lock_for_update(&mut tx, missing)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(id) if id == missing));

        let err = AccountLedger::add_balance(&mut tx, missing, Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));

        let err = AccountLedger::overwrite(&mut tx, missing, &AccountUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_add_balance_accepts_both_signs() {
        let store = MemoryLedgerStore::new();
        let acc = store.open_account(1, "USD", Decimal::from(100));

        let mut tx = store.begin().await.unwrap();
        AccountLedger::add_balance(&mut tx, acc.id, Decimal::new(-2550, 2))
            .await
            .unwrap();
        let after = AccountLedger::add_balance(&mut tx, acc.id, Decimal::new(550, 2))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(after.balance, Decimal::from(80));
        assert_eq!(store.account(acc.id).unwrap().balance, Decimal::from(80));
    }

    #[tokio::test]
    async fn test_overwrite_status_fields() {
        let store = MemoryLedgerStore::new();
        let acc = store.open_account(1, "USD", Decimal::from(10));

        let mut tx = store.begin().await.unwrap();
        let update = AccountUpdate {
            active: Some(false),
            locked: Some(true),
            ..Default::default()
        };
        let after = AccountLedger::overwrite(&mut tx, acc.id, &update)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(!after.active);
        assert!(after.locked);
        assert_eq!(after.balance, Decimal::from(10));
    }
    #[tokio::test]
    async fn test_empty_overwrite_only_locks() {
        let store = MemoryLedgerStore::new();
        let acc = store.open_account(1, "USD", Decimal::from(10));

        let mut tx = store.begin().await.unwrap();
        let after = AccountLedger::overwrite(&mut tx, acc.id, &AccountUpdate::default())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(after, acc);
        assert_eq!(store.lock_history(), vec![acc.id]);
        // begin, locked read, commit: no write issued
        assert_eq!(store.storage_calls(), 3);
    }
}
