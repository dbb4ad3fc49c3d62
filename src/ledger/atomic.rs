//! Atomic Unit
//!
//! Runs a piece of ledger work against one scoped store handle and either
//! commits all of it or rolls all of it back.
//!
//! The handle is passed into the work closure explicitly; there is no ambient
//! transaction. Nested logic must reuse the handle it was given instead of
//! opening a second unit.
//!
//! ```ignore
//! let unit = AtomicUnit::new(store);
//! let account = unit
//!     .run(move |tx| Box::pin(async move { AccountLedger::add_balance(tx, id, delta).await }))
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{error, warn};

use super::store::{LedgerStore, LedgerTx};
use crate::error::LedgerError;

/// Commit-or-rollback wrapper around a [`LedgerStore`]
pub struct AtomicUnit<S> {
    store: Arc<S>,
}

impl<S> Clone for AtomicUnit<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: LedgerStore> AtomicUnit<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `work` to completion inside one store transaction
    pub async fn run<T, F>(&self, work: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, LedgerError>> + Send,
    {
        self.execute(work, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but the whole unit (including the wait for a
    /// connection and any row-lock wait) is bounded by `limit`. On expiry the
    /// unit is rolled back and `Timeout` is returned.
    pub async fn run_with_timeout<T, F>(&self, limit: Duration, work: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, LedgerError>> + Send,
    {
        let deadline = async move {
            tokio::time::sleep(limit).await;
            LedgerError::Timeout(limit)
        };
        self.execute(work, deadline).await
    }

    /// Like [`run`](Self::run), but abandons the unit with `Cancelled` as soon
    /// as `signal` resolves.
    pub async fn run_until<T, F, C>(&self, work: F, signal: C) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, LedgerError>> + Send,
        C: Future<Output = ()> + Send,
    {
        let cancelled = async move {
            signal.await;
            LedgerError::Cancelled
        };
        self.execute(work, cancelled).await
    }

    async fn execute<T, F, A>(&self, work: F, abort: A) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, LedgerError>> + Send,
        A: Future<Output = LedgerError> + Send,
    {
        tokio::pin!(abort);

        let mut tx = tokio::select! {
            biased;
            err = &mut abort => return Err(err),
            tx = self.store.begin() => tx?,
        };

        // `interrupted`: the work future was dropped, possibly mid-statement
        let (outcome, interrupted) = tokio::select! {
            biased;
            err = &mut abort => (Err(err), true),
            res = work(&mut tx) => (res, false),
        };

        match outcome {
            // A commit already in flight is never raced against the abort signal
            Ok(value) => match tx.commit().await {
                Ok(()) => Ok(value),
                Err(e) => {
                    warn!(code = e.code(), error = %e, "Atomic unit commit failed");
                    Err(e)
                }
            },
            Err(cause) => Err(Self::abort(tx, cause, interrupted).await),
        }
    }

    async fn abort(tx: S::Tx, cause: LedgerError, interrupted: bool) -> LedgerError {
        let released = if interrupted {
            tx.abandon().await
        } else {
            tx.rollback().await
        };

        match released {
            Ok(()) => {
                warn!(code = cause.code(), error = %cause, "Atomic unit rolled back");
                cause
            }
            Err(rollback) => {
                error!(
                    cause = %cause,
                    rollback_error = %rollback,
                    "Atomic unit rollback failed"
                );
                LedgerError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedgerStore;
    use crate::ledger::types::AccountId;
    use rust_decimal::Decimal;

    fn setup() -> (Arc<MemoryLedgerStore>, AtomicUnit<MemoryLedgerStore>, AccountId) {
        let store = Arc::new(MemoryLedgerStore::new());
        let acc = store.open_account(1, "USD", Decimal::from(100));
        let unit = AtomicUnit::new(store.clone());
        (store, unit, acc.id)
    }

    #[tokio::test]
    async fn test_success_commits_and_returns_value() {
        let (store, unit, id) = setup();

        let balance = unit
            .run(move |tx| {
                Box::pin(async move {
                    let account = tx.increment_balance(id, Decimal::from(25)).await?;
                    Ok(account.map(|a| a.balance))
                })
            })
            .await
            .unwrap();

        assert_eq!(balance, Some(Decimal::from(125)));
        assert_eq!(store.account(id).unwrap().balance, Decimal::from(125));
    }

    #[tokio::test]
    async fn test_failure_rolls_back_every_effect() {
        let (store, unit, id) = setup();

        let result: Result<(), _> = unit
            .run(move |tx| {
                Box::pin(async move {
                    tx.increment_balance(id, Decimal::from(-40)).await?;
                    Err(LedgerError::AccountNotFound(AccountId::new(999)))
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
        assert_eq!(store.account(id).unwrap().balance, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_rollback_failure_carries_both_errors() {
        let (store, unit, id) = setup();
        store.fail_next_rollback();

        let err = unit
            .run(move |tx| {
                Box::pin(async move {
                    tx.increment_balance(id, Decimal::ONE).await?;
                    Err::<(), _>(LedgerError::AccountNotFound(AccountId::new(77)))
                })
            })
            .await
            .unwrap_err();

        match err {
            LedgerError::RollbackFailed { cause, rollback } => {
                assert!(matches!(*cause, LedgerError::AccountNotFound(_)));
                assert!(matches!(*rollback, LedgerError::Database(_)));
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
        assert_eq!(store.account(id).unwrap().balance, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_timeout_rolls_back() {
        let (store, unit, id) = setup();

        let err = unit
            .run_with_timeout(Duration::from_millis(20), move |tx| {
                Box::pin(async move {
                    tx.increment_balance(id, Decimal::from(-100)).await?;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Timeout(_)));
        assert_eq!(store.account(id).unwrap().balance, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_cancel_signal_rolls_back() {
        let (store, unit, id) = setup();
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            unit.run_until(
                move |tx| {
                    Box::pin(async move {
                        tx.increment_balance(id, Decimal::from(50)).await?;
                        std::future::pending::<()>().await;
                        Ok(())
                    })
                },
                async move {
                    let _ = cancel_rx.await;
                },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel_tx.send(()).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled));
        assert_eq!(store.account(id).unwrap().balance, Decimal::from(100));
    }
}
