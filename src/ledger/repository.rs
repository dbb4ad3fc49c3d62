//! Repository layer for ledger reads and account opening
//!
//! Plain pool queries outside any atomic unit. Nothing here changes an
//! existing balance.

use sqlx::PgPool;

use super::postgres::{ACCOUNT_COLUMNS, AccountRow, TRANSACTION_COLUMNS, TransactionRow};
use super::types::{Account, AccountId, Transaction, TransactionId};
use crate::error::LedgerError;

/// Account repository
pub struct AccountRepository;

impl AccountRepository {
    /// Open a new account with a zero balance
    pub async fn open(
        pool: &PgPool,
        client_id: i64,
        currency: &str,
    ) -> Result<Account, LedgerError> {
        let sql = format!(
            r#"
            INSERT INTO accounts (client_id, currency, balance)
            VALUES ($1, $2, 0)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let row: AccountRow = sqlx::query_as(&sql)
            .bind(client_id)
            .bind(currency)
            .fetch_one(pool)
            .await?;

        let account = Account::from(row);
        tracing::info!(account_id = %account.id, client_id, currency, "Account opened");
        Ok(account)
    }

    /// Get account by ID
    pub async fn get_by_id(pool: &PgPool, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(pool)
            .await?;

        Ok(row.map(Account::from))
    }

    /// List a client's accounts, oldest first
    pub async fn list_by_client(
        pool: &PgPool,
        client_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, LedgerError> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS} FROM accounts
            WHERE client_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql)
            .bind(client_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        Ok(rows.into_iter().map(Account::from).collect())
    }
}

/// Ledger entry repository (read-only: entries are never updated or deleted)
pub struct TransactionRepository;

impl TransactionRepository {
    /// Get ledger entry by ID
    pub async fn get_by_id(
        pool: &PgPool,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(pool)
            .await?;

        row.map(Transaction::try_from).transpose()
    }

    /// Entries touching an account on either side, newest first
    pub async fn list_for_account(
        pool: &PgPool,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM transactions
            WHERE source_account_id = $1 OR dest_account_id = $1
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(account_id.get())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    /// Number of entries touching an account
    pub async fn count_for_account(
        pool: &PgPool,
        account_id: AccountId,
    ) -> Result<i64, LedgerError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM transactions
            WHERE source_account_id = $1 OR dest_account_id = $1
            "#,
        )
        .bind(account_id.get())
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
