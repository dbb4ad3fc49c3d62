//! Ledger Core Types
//!
//! Row types for accounts and ledger entries. Identifiers are newtypes so an
//! absent side is always `None`, never a zero sentinel.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Internal account identifier (`accounts.id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw value for SQL binding
    #[inline]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger entry identifier (`transactions.id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(i64);

impl TransactionId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TransactionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction category, stored as INTEGER
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum TransactionCategory {
    /// Plain account-to-account movement
    #[default]
    Transfer = 0,
    /// Payment to a registered service (`service_id` is set)
    ServicePayment = 1,
}

impl TransactionCategory {
    /// Numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i32 {
        *self as i32
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(TransactionCategory::Transfer),
            1 => Some(TransactionCategory::ServicePayment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCategory::Transfer => "TRANSFER",
            TransactionCategory::ServicePayment => "SERVICE_PAYMENT",
        }
    }
}

impl fmt::Display for TransactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i32> for TransactionCategory {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        TransactionCategory::from_id(value).ok_or(())
    }
}

/// Account row
///
/// `balance` changes only through [`crate::ledger::AccountLedger`] inside an
/// atomic unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    pub currency: String,
    pub active: bool,
    pub locked: bool,
    pub client_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Immutable ledger entry
///
/// Per side exactly one of the internal id or the external reference is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub amount: Decimal,
    pub source_account_id: Option<AccountId>,
    pub dest_account_id: Option<AccountId>,
    pub ext_source_account_id: Option<String>,
    pub ext_dest_account_id: Option<String>,
    pub category: TransactionCategory,
    pub service_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a ledger entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub amount: Decimal,
    pub source_account_id: Option<AccountId>,
    pub dest_account_id: Option<AccountId>,
    pub ext_source_account_id: Option<String>,
    pub ext_dest_account_id: Option<String>,
    pub category: TransactionCategory,
    pub service_id: Option<i64>,
}

impl NewTransaction {
    /// Materialize the entry once the store has assigned its id
    pub fn into_transaction(self, id: TransactionId, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            amount: self.amount,
            source_account_id: self.source_account_id,
            dest_account_id: self.dest_account_id,
            ext_source_account_id: self.ext_source_account_id,
            ext_dest_account_id: self.ext_dest_account_id,
            category: self.category,
            service_id: self.service_id,
            created_at,
        }
    }
}

/// Field set for a full-row overwrite. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub balance: Option<Decimal>,
    pub active: Option<bool>,
    pub locked: Option<bool>,
}

impl AccountUpdate {
    pub fn is_empty(&self) -> bool {
        self.balance.is_none() && self.active.is_none() && self.locked.is_none()
    }

    /// Apply onto an in-memory row
    pub fn apply_to(&self, account: &mut Account) {
        if let Some(balance) = self.balance {
            account.balance = balance;
        }
        if let Some(active) = self.active {
            account.active = active;
        }
        if let Some(locked) = self.locked {
            account.locked = locked;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account() -> Account {
        Account {
            id: AccountId::new(7),
            balance: Decimal::new(10050, 2),
            currency: "USD".to_string(),
            active: true,
            locked: false,
            client_id: 3,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_category_ids() {
        assert_eq!(TransactionCategory::Transfer.id(), 0);
        assert_eq!(TransactionCategory::ServicePayment.id(), 1);
        assert_eq!(
            TransactionCategory::from_id(1),
            Some(TransactionCategory::ServicePayment)
        );
        assert!(TransactionCategory::from_id(42).is_none());
        assert_eq!(
            TransactionCategory::try_from(0),
            Ok(TransactionCategory::Transfer)
        );
        assert!(TransactionCategory::try_from(-1).is_err());
        assert_eq!(TransactionCategory::default(), TransactionCategory::Transfer);
    }

    #[test]
    fn test_account_update_partial() {
        let mut account = sample_account();
        let update = AccountUpdate {
            locked: Some(true),
            ..Default::default()
        };
        update.apply_to(&mut account);

        assert!(account.locked);
        assert!(account.active);
        assert_eq!(account.balance, Decimal::new(10050, 2));
    }

    #[test]
    fn test_account_update_empty() {
        assert!(AccountUpdate::default().is_empty());
        assert!(
            !AccountUpdate {
                balance: Some(Decimal::ZERO),
                ..Default::default()
            }
            .is_empty()
        );
    }

    #[test]
    fn test_ids_serialize_transparent() {
        let json = serde_json::to_string(&AccountId::new(12)).unwrap();
        assert_eq!(json, "12");
        assert_eq!(TransactionId::new(5).to_string(), "5");
    }
}
