//! In-Memory Ledger Store
//!
//! Process-local store with per-row exclusive locks. Writes are staged in the
//! handle and published on commit, so no other handle observes intermediate
//! state. Row locks are held from first touch until commit or rollback, the
//! same way PostgreSQL row locks behave.
//!
//! Used by the test suite and for embedding the engine without a database.
//! It also exposes a storage-call counter, lock acquisition history and
//! rollback fault injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;

use super::store::{LedgerStore, LedgerTx};
use super::types::{Account, AccountId, AccountUpdate, NewTransaction, Transaction, TransactionId};
use crate::error::LedgerError;

#[derive(Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    row_locks: HashMap<AccountId, Arc<RowLock<()>>>,
    transactions: Vec<Transaction>,
    last_account_id: i64,
    last_transaction_id: i64,
}

struct Shared {
    state: Mutex<State>,
    lock_timeout: Option<Duration>,
    storage_calls: AtomicUsize,
    lock_history: Mutex<Vec<AccountId>>,
    fail_next_rollback: AtomicBool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count_call(&self) {
        self.storage_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory [`LedgerStore`]
#[derive(Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    /// Store with unbounded lock waits
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Store whose row-lock waits fail with `LockContention` after `limit`
    pub fn with_lock_timeout(limit: Duration) -> Self {
        Self::build(Some(limit))
    }

    fn build(lock_timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                lock_timeout,
                storage_calls: AtomicUsize::new(0),
                lock_history: Mutex::new(Vec::new()),
                fail_next_rollback: AtomicBool::new(false),
            }),
        }
    }

    /// Seed an account outside any atomic unit (account opening)
    pub fn open_account(&self, client_id: i64, currency: &str, balance: Decimal) -> Account {
        let mut state = self.shared.state();
        state.last_account_id += 1;
        let id = AccountId::new(state.last_account_id);
        let account = Account {
            id,
            balance,
            currency: currency.to_string(),
            active: true,
            locked: false,
            client_id,
            created_at: Utc::now(),
        };
        state.accounts.insert(id, account.clone());
        state.row_locks.insert(id, Arc::new(RowLock::new(())));
        account
    }

    /// Committed snapshot of one account
    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.shared.state().accounts.get(&id).cloned()
    }

    /// Committed snapshot of every account
    pub fn accounts(&self) -> Vec<Account> {
        self.shared.state().accounts.values().cloned().collect()
    }

    /// Committed ledger entries in insertion order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.shared.state().transactions.clone()
    }

    /// Number of store operations issued so far (begin and every handle call)
    pub fn storage_calls(&self) -> usize {
        self.shared.storage_calls.load(Ordering::SeqCst)
    }

    /// Row locks in the order they were granted, across all handles
    pub fn lock_history(&self) -> Vec<AccountId> {
        self.shared
            .lock_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make the next `rollback` report a failure (effects are still discarded)
    pub fn fail_next_rollback(&self) {
        self.shared.fail_next_rollback.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, LedgerError> {
        self.shared.count_call();
        Ok(MemoryTx {
            shared: self.shared.clone(),
            held: HashMap::new(),
            staged_accounts: BTreeMap::new(),
            staged_transactions: Vec::new(),
        })
    }
}

/// Open handle on a [`MemoryLedgerStore`]
pub struct MemoryTx {
    shared: Arc<Shared>,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    staged_accounts: BTreeMap<AccountId, Account>,
    staged_transactions: Vec<Transaction>,
}

impl MemoryTx {
    /// Take the row lock once per handle. Returns false if the row does not exist.
    async fn acquire(&mut self, id: AccountId) -> Result<bool, LedgerError> {
        if self.held.contains_key(&id) {
            return Ok(true);
        }

        let lock = self.shared.state().row_locks.get(&id).cloned();
        let Some(lock) = lock else {
            return Ok(false);
        };

        let guard = match self.shared.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, lock.lock_owned())
                .await
                .map_err(|_| {
                    LedgerError::LockContention(format!(
                        "lock wait on account {} exceeded {:?}",
                        id, limit
                    ))
                })?,
            None => lock.lock_owned().await,
        };

        self.shared
            .lock_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        self.held.insert(id, guard);
        Ok(true)
    }

    /// Latest version visible to this handle
    fn current(&self, id: AccountId) -> Option<Account> {
        self.staged_accounts
            .get(&id)
            .cloned()
            .or_else(|| self.shared.state().accounts.get(&id).cloned())
    }

    async fn locked_modify(
        &mut self,
        id: AccountId,
        modify: impl FnOnce(&mut Account) -> Result<(), LedgerError> + Send,
    ) -> Result<Option<Account>, LedgerError> {
        if !self.acquire(id).await? {
            return Ok(None);
        }
        let Some(mut account) = self.current(id) else {
            return Ok(None);
        };
        modify(&mut account)?;
        self.staged_accounts.insert(id, account.clone());
        Ok(Some(account))
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn insert_transaction(
        &mut self,
        new: &NewTransaction,
    ) -> Result<Transaction, LedgerError> {
        self.shared.count_call();

        let mut state = self.shared.state();
        for id in [new.source_account_id, new.dest_account_id]
            .into_iter()
            .flatten()
        {
            if !state.accounts.contains_key(&id) {
                return Err(LedgerError::AccountNotFound(id));
            }
        }

        // Ids behave like a sequence: consumed even if the handle rolls back
        state.last_transaction_id += 1;
        let id = TransactionId::new(state.last_transaction_id);
        drop(state);

        let transaction = new.clone().into_transaction(id, Utc::now());
        self.staged_transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn select_account_for_update(
        &mut self,
        id: AccountId,
    ) -> Result<Option<Account>, LedgerError> {
        self.shared.count_call();
        if !self.acquire(id).await? {
            return Ok(None);
        }
        Ok(self.current(id))
    }

    async fn increment_balance(
        &mut self,
        id: AccountId,
        delta: Decimal,
    ) -> Result<Option<Account>, LedgerError> {
        self.shared.count_call();
        self.locked_modify(id, move |account| {
            // Same failure PostgreSQL reports for NUMERIC overflow
            account.balance = account.balance.checked_add(delta).ok_or_else(|| {
                LedgerError::Database(format!("numeric field overflow on account {id}"))
            })?;
            Ok(())
        })
        .await
    }

    async fn update_account(
        &mut self,
        id: AccountId,
        update: &AccountUpdate,
    ) -> Result<Option<Account>, LedgerError> {
        self.shared.count_call();
        let update = update.clone();
        self.locked_modify(id, move |account| {
            update.apply_to(account);
            Ok(())
        })
        .await
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.shared.count_call();
        {
            let mut state = self.shared.state();
            for (id, account) in self.staged_accounts {
                state.accounts.insert(id, account);
            }
            state.transactions.extend(self.staged_transactions);
        }
        debug!(rows_unlocked = self.held.len(), "Memory store commit");
        // Row locks are released only after the new versions are published
        drop(self.held);
        Ok(())
    }

    async fn abandon(self) -> Result<(), LedgerError> {
        // A dropped lock wait holds nothing, so a plain rollback never blocks
        self.rollback().await
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.shared.count_call();
        let fail = self.shared.fail_next_rollback.swap(false, Ordering::SeqCst);
        drop(self.held);
        if fail {
            return Err(LedgerError::Database(
                "injected rollback failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_publishes_staged_writes() {
        let store = MemoryLedgerStore::new();
        let acc = store.open_account(1, "USD", Decimal::from(100));

        let mut tx = store.begin().await.unwrap();
        let updated = tx
            .increment_balance(acc.id, Decimal::from(-30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.balance, Decimal::from(70));

        // Not visible before commit
        assert_eq!(store.account(acc.id).unwrap().balance, Decimal::from(100));

        tx.commit().await.unwrap();
        assert_eq!(store.account(acc.id).unwrap().balance, Decimal::from(70));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryLedgerStore::new();
        let acc = store.open_account(1, "USD", Decimal::from(100));

        let mut tx = store.begin().await.unwrap();
        tx.increment_balance(acc.id, Decimal::from(5))
            .await
            .unwrap();
        tx.insert_transaction(&NewTransaction {
            amount: Decimal::from(5),
            source_account_id: None,
            dest_account_id: Some(acc.id),
            ext_source_account_id: Some("EXT-1".to_string()),
            ext_dest_account_id: None,
            category: Default::default(),
            service_id: None,
        })
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.account(acc.id).unwrap().balance, Decimal::from(100));
        assert!(store.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_missing_account_reads_as_none() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let missing = tx
            .select_account_for_update(AccountId::new(404))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_handle() {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(50));
        let acc = store.open_account(1, "USD", Decimal::ZERO);

        let mut first = store.begin().await.unwrap();
        first.select_account_for_update(acc.id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second
            .increment_balance(acc.id, Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LockContention(_)));

        // Released on commit
        first.commit().await.unwrap();
        let account = second
            .increment_balance(acc.id, Decimal::ONE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_injected_rollback_failure_still_discards() {
        let store = MemoryLedgerStore::new();
        let acc = store.open_account(1, "USD", Decimal::from(10));
        store.fail_next_rollback();

        let mut tx = store.begin().await.unwrap();
        tx.increment_balance(acc.id, Decimal::from(10))
            .await
            .unwrap();
        assert!(tx.rollback().await.is_err());
        assert_eq!(store.account(acc.id).unwrap().balance, Decimal::from(10));
    }

    #[tokio::test]
    async fn test_balance_overflow_is_an_error() {
        let store = MemoryLedgerStore::new();
        let acc = store.open_account(1, "USD", Decimal::MAX);

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .increment_balance(acc.id, Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Database(_)));

        // The failed write staged nothing
        let account = tx
            .select_account_for_update(acc.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, Decimal::MAX);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_calls_counted() {
        let store = MemoryLedgerStore::new();
        let acc = store.open_account(1, "USD", Decimal::ZERO);
        assert_eq!(store.storage_calls(), 0);

        let mut tx = store.begin().await.unwrap();
        tx.select_account_for_update(acc.id).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.storage_calls(), 3);
        assert_eq!(store.lock_history(), vec![acc.id]);
    }
}
