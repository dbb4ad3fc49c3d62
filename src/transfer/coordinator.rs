//! Transfer Coordinator
//!
//! Executes one validated transfer inside one atomic unit:
//!
//! 1. Validate the request (no storage access on failure)
//! 2. Insert the ledger entry
//! 3. Lock and adjust each internal account, ascending id first
//! 4. Commit, or roll back everything on the first error

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::types::{LegRole, TransferRequest, TransferResult};
use super::validation::TransferPlan;
use crate::error::LedgerError;
use crate::ledger::{AccountLedger, AtomicUnit, LedgerStore, LedgerTx};

/// Transfer Coordinator - applies transfers against a [`LedgerStore`]
pub struct TransferCoordinator<S> {
    unit: AtomicUnit<S>,
}

impl<S> Clone for TransferCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            unit: self.unit.clone(),
        }
    }
}

impl<S: LedgerStore> TransferCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            unit: AtomicUnit::new(store),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.unit.store()
    }

    /// Execute a transfer
    ///
    /// Either the entry and every balance change commit together, or nothing
    /// is persisted.
    pub async fn transfer(&self, req: TransferRequest) -> Result<TransferResult, LedgerError> {
        let plan = Self::plan(&req)?;
        let outcome = self
            .unit
            .run(move |tx| Box::pin(async move { apply(tx, plan).await }))
            .await;
        Self::report(outcome)
    }

    /// Execute a transfer, giving up with `Timeout` once `limit` elapses
    pub async fn transfer_with_timeout(
        &self,
        req: TransferRequest,
        limit: Duration,
    ) -> Result<TransferResult, LedgerError> {
        let plan = Self::plan(&req)?;
        let outcome = self
            .unit
            .run_with_timeout(limit, move |tx| Box::pin(async move { apply(tx, plan).await }))
            .await;
        Self::report(outcome)
    }

    /// Execute a transfer, abandoning it with `Cancelled` when `signal` fires
    pub async fn transfer_until<C>(
        &self,
        req: TransferRequest,
        signal: C,
    ) -> Result<TransferResult, LedgerError>
    where
        C: Future<Output = ()> + Send,
    {
        let plan = Self::plan(&req)?;
        let outcome = self
            .unit
            .run_until(move |tx| Box::pin(async move { apply(tx, plan).await }), signal)
            .await;
        Self::report(outcome)
    }

    fn plan(req: &TransferRequest) -> Result<TransferPlan, LedgerError> {
        req.validate().map_err(|e| {
            debug!(code = e.code(), error = %e, "Transfer rejected");
            LedgerError::from(e)
        })
    }

    fn report(
        outcome: Result<TransferResult, LedgerError>,
    ) -> Result<TransferResult, LedgerError> {
        match &outcome {
            Ok(result) => info!(
                transaction_id = %result.transaction.id,
                amount = %result.transaction.amount,
                "Transfer committed"
            ),
            Err(e) => warn!(
                code = e.code(),
                retryable = e.is_retryable(),
                error = %e,
                "Transfer failed"
            ),
        }
        outcome
    }
}

/// Body of the atomic unit. The entry goes in first so an entry referencing
/// a missing account fails before any lock is taken.
async fn apply<T: LedgerTx>(tx: &mut T, plan: TransferPlan) -> Result<TransferResult, LedgerError> {
    let transaction = tx.insert_transaction(&plan.new_transaction()).await?;
    debug!(transaction_id = %transaction.id, "Ledger entry inserted");

    let mut source_account = None;
    let mut dest_account = None;

    for (account_id, role) in plan.lock_order() {
        AccountLedger::lock_for_update(tx, account_id).await?;
        let account = AccountLedger::add_balance(tx, account_id, role.delta(plan.amount())).await?;
        debug!(
            account_id = %account_id,
            role = role.as_str(),
            balance = %account.balance,
            "Leg applied"
        );

        match role {
            LegRole::Source => source_account = Some(account),
            LegRole::Destination => dest_account = Some(account),
        }
    }

    Ok(TransferResult {
        transaction,
        source_account,
        dest_account,
        external_source_ref: plan.source().external_ref().map(str::to_string),
        external_dest_ref: plan.dest().external_ref().map(str::to_string),
    })
}
