//! PostgreSQL Ledger Store
//!
//! `sqlx` implementation of the store contract. One handle wraps one
//! `sqlx::Transaction`; row locks are PostgreSQL row locks, so blocking,
//! lock timeouts and deadlock detection are delegated to the server.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, FromRow, PgPool, Postgres};
use tracing::{debug, warn};

use super::store::{LedgerStore, LedgerTx};
use super::types::{
    Account, AccountId, AccountUpdate, NewTransaction, Transaction, TransactionCategory,
};
use crate::db::schema::{TRANSACTIONS_DEST_FK, TRANSACTIONS_SOURCE_FK};
use crate::error::LedgerError;

pub(crate) const ACCOUNT_COLUMNS: &str =
    "id, balance, currency, active, locked, client_id, created_at";

pub(crate) const TRANSACTION_COLUMNS: &str = "id, amount, source_account_id, dest_account_id, \
     ext_source_account_id, ext_dest_account_id, category, service_id, created_at";

/// Raw `accounts` row
#[derive(Debug, FromRow)]
pub(crate) struct AccountRow {
    id: i64,
    balance: Decimal,
    currency: String,
    active: bool,
    locked: bool,
    client_id: i64,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: AccountId::new(row.id),
            balance: row.balance,
            currency: row.currency,
            active: row.active,
            locked: row.locked,
            client_id: row.client_id,
            created_at: row.created_at,
        }
    }
}

/// Raw `transactions` row
#[derive(Debug, FromRow)]
pub(crate) struct TransactionRow {
    id: i64,
    amount: Decimal,
    source_account_id: Option<i64>,
    dest_account_id: Option<i64>,
    ext_source_account_id: Option<String>,
    ext_dest_account_id: Option<String>,
    category: i32,
    service_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let category = TransactionCategory::try_from(row.category).map_err(|()| {
            LedgerError::SystemError(format!(
                "Invalid category {} on transaction {}",
                row.category, row.id
            ))
        })?;

        Ok(Transaction {
            id: row.id.into(),
            amount: row.amount,
            source_account_id: row.source_account_id.map(AccountId::new),
            dest_account_id: row.dest_account_id.map(AccountId::new),
            ext_source_account_id: row.ext_source_account_id,
            ext_dest_account_id: row.ext_dest_account_id,
            category,
            service_id: row.service_id,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL-backed [`LedgerStore`]
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Bound row-lock waits inside every unit (`SET LOCAL lock_timeout`).
    /// Expiry surfaces as `LockContention`.
    pub fn with_lock_timeout(mut self, limit: Option<Duration>) -> Self {
        self.lock_timeout = limit;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx, LedgerError> {
        let mut tx = self.pool.begin().await?;

        if let Some(limit) = self.lock_timeout {
            // SET does not take bind parameters; set_config(.., true) is SET LOCAL
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", limit.as_millis()))
                .execute(&mut *tx)
                .await?;
        }

        let backend_pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *tx)
            .await?;

        Ok(PgLedgerTx {
            tx,
            pool: self.pool.clone(),
            backend_pid,
        })
    }
}

/// Open PostgreSQL transaction
pub struct PgLedgerTx {
    tx: sqlx::Transaction<'static, Postgres>,
    /// Side channel for cancelling a statement that is blocked on a lock
    pool: PgPool,
    backend_pid: i32,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn insert_transaction(
        &mut self,
        new: &NewTransaction,
    ) -> Result<Transaction, LedgerError> {
        let sql = format!(
            r#"
            INSERT INTO transactions
                (amount, source_account_id, dest_account_id,
                 ext_source_account_id, ext_dest_account_id, category, service_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );

        let row: TransactionRow = sqlx::query_as(&sql)
            .bind(new.amount)
            .bind(new.source_account_id.map(|id| id.get()))
            .bind(new.dest_account_id.map(|id| id.get()))
            .bind(new.ext_source_account_id.as_deref())
            .bind(new.ext_dest_account_id.as_deref())
            .bind(new.category.id())
            .bind(new.service_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_insert_error(e, new))?;

        debug!(transaction_id = row.id, "Ledger entry inserted");
        row.try_into()
    }

    async fn select_account_for_update(
        &mut self,
        id: AccountId,
    ) -> Result<Option<Account>, LedgerError> {
        // NO KEY UPDATE: does not conflict with the KEY SHARE locks that
        // foreign-key checks on concurrent `transactions` inserts take.
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 LIMIT 1 FOR NO KEY UPDATE"
        );

        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(Account::from))
    }

    async fn increment_balance(
        &mut self,
        id: AccountId,
        delta: Decimal,
    ) -> Result<Option<Account>, LedgerError> {
        let sql = format!(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );

        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(Account::from))
    }

    async fn update_account(
        &mut self,
        id: AccountId,
        update: &AccountUpdate,
    ) -> Result<Option<Account>, LedgerError> {
        let sql = format!(
            r#"
            UPDATE accounts
            SET balance = COALESCE($2, balance),
                active = COALESCE($3, active),
                locked = COALESCE($4, locked)
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );

        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .bind(update.balance)
            .bind(update.active)
            .bind(update.locked)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(Account::from))
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn abandon(self) -> Result<(), LedgerError> {
        // ROLLBACK first drains the dropped statement; unblock it so the
        // drain does not wait for the other lock holder.
        match cancel_running_statement(&self.pool, self.backend_pid).await {
            Ok(cancelled) => debug!(
                backend_pid = self.backend_pid,
                cancelled, "Abandoned unit statement cancel"
            ),
            Err(e) => warn!(
                backend_pid = self.backend_pid,
                error = %e,
                "Failed to cancel abandoned unit statement"
            ),
        }

        self.tx.rollback().await?;
        Ok(())
    }
}

/// Cancel whatever statement backend `pid` is running.
///
/// Issued from a different connection: the handle's own connection is busy
/// with the statement. Falls back to a dedicated connection when the pool has
/// nothing idle, since every pooled connection may be waiting on the same lock.
async fn cancel_running_statement(pool: &PgPool, pid: i32) -> Result<bool, sqlx::Error> {
    const CANCEL_SQL: &str = "SELECT pg_cancel_backend(pid) FROM pg_stat_activity \
         WHERE pid = $1 AND state = 'active'";

    let cancelled: Option<bool> = match pool.try_acquire() {
        Some(mut conn) => {
            sqlx::query_scalar(CANCEL_SQL)
                .bind(pid)
                .fetch_optional(&mut *conn)
                .await?
        }
        None => {
            let mut conn = PgConnection::connect_with(&pool.connect_options()).await?;
            let cancelled: Option<bool> = sqlx::query_scalar(CANCEL_SQL)
                .bind(pid)
                .fetch_optional(&mut conn)
                .await?;
            conn.close().await?;
            cancelled
        }
    };

    Ok(cancelled.unwrap_or(false))
}

/// Foreign-key violations on insert mean the referenced account is missing
fn map_insert_error(e: sqlx::Error, new: &NewTransaction) -> LedgerError {
    if let sqlx::Error::Database(db) = &e
        && db.is_foreign_key_violation()
    {
        let missing = match db.constraint() {
            Some(TRANSACTIONS_SOURCE_FK) => new.source_account_id,
            Some(TRANSACTIONS_DEST_FK) => new.dest_account_id,
            _ => new.source_account_id.or(new.dest_account_id),
        };
        if let Some(id) = missing {
            return LedgerError::AccountNotFound(id);
        }
    }
    e.into()
}
