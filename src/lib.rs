//! Bank Ledger - Atomic Transfer Engine
//!
//! Moves money between accounts so that every transfer writes exactly one
//! ledger entry and its balance changes together, or not at all.
//!
//! # Modules
//!
//! - [`ledger`] - Atomic unit, account mutation primitives, storage backends
//! - [`transfer`] - Request validation and the transfer coordinator
//! - [`db`] - PostgreSQL connection pool and schema
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup
//! - [`error`] - Unified error type

pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod transfer;

// Convenient re-exports at crate root
pub use config::{AppConfig, DatabaseConfig};
pub use error::LedgerError;
pub use ledger::{
    Account, AccountId, AccountLedger, AtomicUnit, LedgerStore, LedgerTx, MemoryLedgerStore,
    PgLedgerStore, Transaction, TransactionCategory, TransactionId,
};
pub use transfer::{TransferCoordinator, TransferRequest, TransferResult, ValidationError};
