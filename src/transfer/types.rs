//! Transfer Types
//!
//! Request/result shapes exchanged with the HTTP layer, plus the leg model the
//! coordinator works with after validation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{Account, AccountId, Transaction, TransactionCategory};

/// Transfer request as received from the caller
///
/// Per side, set exactly one of the internal account id or the external
/// reference. An empty reference counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(default)]
    pub source_account_id: Option<AccountId>,
    #[serde(default)]
    pub dest_account_id: Option<AccountId>,
    #[serde(default)]
    pub external_source_ref: Option<String>,
    #[serde(default)]
    pub external_dest_ref: Option<String>,
    pub amount: Decimal,
    #[serde(default)]
    pub category: TransactionCategory,
    #[serde(default)]
    pub service_id: Option<i64>,
}

impl TransferRequest {
    /// Internal account to internal account
    pub fn internal(source: AccountId, dest: AccountId, amount: Decimal) -> Self {
        Self {
            source_account_id: Some(source),
            dest_account_id: Some(dest),
            amount,
            ..Default::default()
        }
    }

    /// Incoming funds from a correspondent account
    pub fn inbound(
        external_source_ref: impl Into<String>,
        dest: AccountId,
        amount: Decimal,
    ) -> Self {
        Self {
            external_source_ref: Some(external_source_ref.into()),
            dest_account_id: Some(dest),
            amount,
            ..Default::default()
        }
    }

    /// Outgoing funds to a correspondent account
    pub fn outbound(
        source: AccountId,
        external_dest_ref: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            source_account_id: Some(source),
            external_dest_ref: Some(external_dest_ref.into()),
            amount,
            ..Default::default()
        }
    }
}

/// Which side of a transfer a leg sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegRole {
    Source,
    Destination,
}

impl LegRole {
    /// Balance delta applied to an internal account in this role
    pub fn delta(&self, amount: Decimal) -> Decimal {
        match self {
            LegRole::Source => -amount,
            LegRole::Destination => amount,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LegRole::Source => "SOURCE",
            LegRole::Destination => "DESTINATION",
        }
    }
}

/// One resolved side of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leg {
    Internal(AccountId),
    /// Opaque correspondent reference, never resolved by the engine
    External(String),
}

impl Leg {
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Leg::Internal(id) => Some(*id),
            Leg::External(_) => None,
        }
    }

    pub fn external_ref(&self) -> Option<&str> {
        match self {
            Leg::Internal(_) => None,
            Leg::External(reference) => Some(reference),
        }
    }
}

/// Outcome of a committed transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transaction: Transaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_account: Option<Account>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_account: Option<Account>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_source_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_dest_ref: Option<String>,
}
