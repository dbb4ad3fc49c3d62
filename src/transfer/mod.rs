//! Money transfers between ledger accounts
//!
//! # Flow
//!
//! ```text
//! TransferRequest ──validate──▶ TransferPlan
//!                                   │
//!                  ┌────────── AtomicUnit ──────────┐
//!                  │ insert Transaction             │
//!                  │ lock + add_balance (lower id)  │
//!                  │ lock + add_balance (higher id) │
//!                  └──────── commit | rollback ─────┘
//!                                   │
//!                                   ▼
//!                            TransferResult
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Validate-Before-Storage**: a malformed request never opens a unit
//! 2. **Entry-First**: the `Transaction` row is written before any balance
//! 3. **Canonical Lock Order**: internal accounts are locked by ascending id,
//!    whichever side they are on, so two opposite transfers cannot deadlock
//! 4. **External legs are opaque**: references are recorded and echoed, never
//!    locked or resolved

pub mod coordinator;
pub mod types;
pub mod validation;


pub use coordinator::TransferCoordinator;
pub use types::{Leg, LegRole, TransferRequest, TransferResult};
pub use validation::{TransferPlan, ValidationError};
