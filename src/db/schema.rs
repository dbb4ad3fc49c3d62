//! Ledger schema bootstrap
//!
//! Idempotent DDL for the two tables the engine touches. Clients, users and
//! the rest of the banking schema belong to other services.

use sqlx::PgPool;

/// Constraint names are referenced when mapping insert errors
pub const TRANSACTIONS_SOURCE_FK: &str = "transactions_source_account_fk";
pub const TRANSACTIONS_DEST_FK: &str = "transactions_dest_account_fk";

const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    balance     NUMERIC NOT NULL DEFAULT 0,
    currency    VARCHAR(8) NOT NULL,
    active      BOOLEAN NOT NULL DEFAULT TRUE,
    locked      BOOLEAN NOT NULL DEFAULT FALSE,
    client_id   BIGINT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id                     BIGSERIAL PRIMARY KEY,
    amount                 NUMERIC NOT NULL CHECK (amount > 0),
    source_account_id      BIGINT,
    dest_account_id        BIGINT,
    ext_source_account_id  TEXT,
    ext_dest_account_id    TEXT,
    category               INTEGER NOT NULL DEFAULT 0,
    service_id             BIGINT,
    created_at             TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT transactions_source_account_fk
        FOREIGN KEY (source_account_id) REFERENCES accounts (id),
    CONSTRAINT transactions_dest_account_fk
        FOREIGN KEY (dest_account_id) REFERENCES accounts (id),
    CONSTRAINT transactions_one_source
        CHECK ((source_account_id IS NULL) <> (ext_source_account_id IS NULL)),
    CONSTRAINT transactions_one_dest
        CHECK ((dest_account_id IS NULL) <> (ext_dest_account_id IS NULL))
)
"#;

const INDEXES: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS accounts_client_id_idx ON accounts (client_id)",
    "CREATE INDEX IF NOT EXISTS transactions_source_idx ON transactions (source_account_id)",
    "CREATE INDEX IF NOT EXISTS transactions_dest_idx ON transactions (dest_account_id)",
];

/// Create the ledger tables if they do not exist yet
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_ACCOUNTS).execute(pool).await?;
    sqlx::query(CREATE_TRANSACTIONS).execute(pool).await?;
    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Ledger schema ensured");
    Ok(())
}
