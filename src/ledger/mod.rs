//! Ledger storage layer
//!
//! # Architecture
//!
//! ```text
//! TransferCoordinator
//!        │ run(work)
//!        ▼
//!   AtomicUnit ──begin/commit/rollback──▶ LedgerStore (PostgreSQL | memory)
//!        │ &mut Tx
//!        ▼
//!  AccountLedger ──lock / add / overwrite──▶ LedgerTx
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Scoped handle**: balances change only through a `LedgerTx` owned by an
//!    `AtomicUnit`; there is no ambient transaction.
//! 2. **In-place delta**: transfers use `balance = balance + delta` under the
//!    row lock, never read-compute-write in application code.
//! 3. **Append-only entries**: `Transaction` rows are inserted once and have no
//!    update or delete path.

pub mod account_ledger;
pub mod atomic;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod store;
pub mod types;

pub use account_ledger::AccountLedger;
pub use atomic::AtomicUnit;
pub use memory::{MemoryLedgerStore, MemoryTx};
pub use postgres::{PgLedgerStore, PgLedgerTx};
pub use repository::{AccountRepository, TransactionRepository};
pub use store::{LedgerStore, LedgerTx};
pub use types::{
    Account, AccountId, AccountUpdate, NewTransaction, Transaction, TransactionCategory,
    TransactionId,
};
