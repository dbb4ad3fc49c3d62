//! Transfer precondition checks
//!
//! Runs before any storage access. A request that passes becomes a
//! [`TransferPlan`], whose fields are private so the coordinator can only ever
//! execute validated input.

use rust_decimal::Decimal;

use super::types::{Leg, LegRole, TransferRequest};
use crate::ledger::{AccountId, NewTransaction, TransactionCategory};

// ============================================================================
// Validation Errors
// ============================================================================

/// Malformed transfer request
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Source must name an internal account or an external reference")]
    MissingSource,

    #[error("Source names both an internal account and an external reference")]
    AmbiguousSource,

    #[error("Destination must name an internal account or an external reference")]
    MissingDestination,

    #[error("Destination names both an internal account and an external reference")]
    AmbiguousDestination,

    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    #[error("At least one side must be an internal account")]
    NoInternalLeg,

    #[error("Source and destination are the same account: {0}")]
    SameAccount(AccountId),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingSource => "MISSING_SOURCE",
            ValidationError::AmbiguousSource => "AMBIGUOUS_SOURCE",
            ValidationError::MissingDestination => "MISSING_DESTINATION",
            ValidationError::AmbiguousDestination => "AMBIGUOUS_DESTINATION",
            ValidationError::NonPositiveAmount => "INVALID_AMOUNT",
            ValidationError::NoInternalLeg => "NO_INTERNAL_LEG",
            ValidationError::SameAccount(_) => "SAME_ACCOUNT",
        }
    }
}

// ============================================================================
// TransferPlan - Validated Transfer
// ============================================================================

/// Validated transfer, ready to execute
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    source: Leg,
    dest: Leg,
    amount: Decimal,
    category: TransactionCategory,
    service_id: Option<i64>,
}

impl TransferPlan {
    pub fn source(&self) -> &Leg {
        &self.source
    }

    pub fn dest(&self) -> &Leg {
        &self.dest
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Ledger entry capturing both sides and the amount exactly as given
    pub fn new_transaction(&self) -> NewTransaction {
        NewTransaction {
            amount: self.amount,
            source_account_id: self.source.account_id(),
            dest_account_id: self.dest.account_id(),
            ext_source_account_id: self.source.external_ref().map(str::to_string),
            ext_dest_account_id: self.dest.external_ref().map(str::to_string),
            category: self.category,
            service_id: self.service_id,
        }
    }

    /// Internal legs in canonical lock order: ascending account id,
    /// independent of which one is the source.
    pub fn lock_order(&self) -> Vec<(AccountId, LegRole)> {
        let mut legs: Vec<(AccountId, LegRole)> = [
            (self.source.account_id(), LegRole::Source),
            (self.dest.account_id(), LegRole::Destination),
        ]
        .into_iter()
        .filter_map(|(id, role)| id.map(|id| (id, role)))
        .collect();

        legs.sort_by_key(|(id, _)| *id);
        legs
    }
}

fn resolve_leg(
    account_id: Option<AccountId>,
    external_ref: Option<&str>,
    missing: ValidationError,
    ambiguous: ValidationError,
) -> Result<Leg, ValidationError> {
    let external_ref = external_ref.filter(|r| !r.is_empty());
    match (account_id, external_ref) {
        (Some(id), None) => Ok(Leg::Internal(id)),
        (None, Some(reference)) => Ok(Leg::External(reference.to_string())),
        (None, None) => Err(missing),
        (Some(_), Some(_)) => Err(ambiguous),
    }
}

impl TransferRequest {
    /// Check the request shape without touching storage
    ///
    /// # Validation Rules
    /// - Each side: exactly one of internal id / non-empty external reference
    /// - `amount > 0`
    /// - At least one internal side, and not the same account on both
    pub fn validate(&self) -> Result<TransferPlan, ValidationError> {
        let source = resolve_leg(
            self.source_account_id,
            self.external_source_ref.as_deref(),
            ValidationError::MissingSource,
            ValidationError::AmbiguousSource,
        )?;
        let dest = resolve_leg(
            self.dest_account_id,
            self.external_dest_ref.as_deref(),
            ValidationError::MissingDestination,
            ValidationError::AmbiguousDestination,
        )?;

        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount);
        }

        match (source.account_id(), dest.account_id()) {
            (None, None) => return Err(ValidationError::NoInternalLeg),
            (Some(a), Some(b)) if a == b => return Err(ValidationError::SameAccount(a)),
            _ => {}
        }

        Ok(TransferPlan {
            source,
            dest,
            amount: self.amount,
            category: self.category,
            service_id: self.service_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i64) -> AccountId {
        AccountId::new(n)
    }

    #[test]
    fn test_internal_pair_is_valid() {
        let plan = TransferRequest::internal(id(1), id(2), Decimal::from(30))
            .validate()
            .unwrap();
        assert_eq!(plan.source(), &Leg::Internal(id(1)));
        assert_eq!(plan.dest(), &Leg::Internal(id(2)));
        assert_eq!(plan.amount(), Decimal::from(30));
    }

    #[test]
    fn test_missing_source() {
        let req = TransferRequest {
            dest_account_id: Some(id(2)),
            amount: Decimal::ONE,
            ..Default::default()
        };
        assert_eq!(req.validate(), Err(ValidationError::MissingSource));
    }

    #[test]
    fn test_empty_external_ref_counts_as_absent() {
        let req = TransferRequest {
            external_source_ref: Some(String::new()),
            dest_account_id: Some(id(2)),
            amount: Decimal::ONE,
            ..Default::default()
        };
        assert_eq!(req.validate(), Err(ValidationError::MissingSource));
    }

    #[test]
    fn test_ambiguous_sides() {
        let req = TransferRequest {
            source_account_id: Some(id(1)),
            external_source_ref: Some("EXT".to_string()),
            dest_account_id: Some(id(2)),
            amount: Decimal::ONE,
            ..Default::default()
        };
        assert_eq!(req.validate(), Err(ValidationError::AmbiguousSource));

        let req = TransferRequest {
            source_account_id: Some(id(1)),
            dest_account_id: Some(id(2)),
            external_dest_ref: Some("EXT".to_string()),
            amount: Decimal::ONE,
            ..Default::default()
        };
        assert_eq!(req.validate(), Err(ValidationError::AmbiguousDestination));
    }

    #[test]
    fn test_missing_destination() {
        let req = TransferRequest {
            source_account_id: Some(id(1)),
            amount: Decimal::ONE,
            ..Default::default()
        };
        assert_eq!(req.validate(), Err(ValidationError::MissingDestination));
    }

    #[test]
    fn test_non_positive_amount() {
        for amount in [Decimal::ZERO, Decimal::from(-5)] {
            let req = TransferRequest::internal(id(1), id(2), amount);
            assert_eq!(req.validate(), Err(ValidationError::NonPositiveAmount));
        }
    }

    #[test]
    fn test_both_external_rejected() {
        let req = TransferRequest {
            external_source_ref: Some("EXT-A".to_string()),
            external_dest_ref: Some("EXT-B".to_string()),
            amount: Decimal::ONE,
            ..Default::default()
        };
        assert_eq!(req.validate(), Err(ValidationError::NoInternalLeg));
    }

    #[test]
    fn test_same_account_rejected() {
        let req = TransferRequest::internal(id(4), id(4), Decimal::ONE);
        assert_eq!(req.validate(), Err(ValidationError::SameAccount(id(4))));
    }

    #[test]
    fn test_zero_id_is_a_real_id() {
        // No sentinel: Some(0) is an internal account like any other
        let plan = TransferRequest::internal(id(0), id(1), Decimal::ONE)
            .validate()
            .unwrap();
        assert_eq!(plan.source().account_id(), Some(id(0)));
    }

    #[test]
    fn test_lock_order_ascending_regardless_of_role() {
        let plan = TransferRequest::internal(id(9), id(3), Decimal::ONE)
            .validate()
            .unwrap();
        assert_eq!(
            plan.lock_order(),
            vec![(id(3), LegRole::Destination), (id(9), LegRole::Source)]
        );

        let plan = TransferRequest::internal(id(3), id(9), Decimal::ONE)
            .validate()
            .unwrap();
        assert_eq!(
            plan.lock_order(),
            vec![(id(3), LegRole::Source), (id(9), LegRole::Destination)]
        );
    }

    #[test]
    fn test_lock_order_single_internal_leg() {
        let plan = TransferRequest::outbound(id(5), "EXT", Decimal::ONE)
            .validate()
            .unwrap();
        assert_eq!(plan.lock_order(), vec![(id(5), LegRole::Source)]);
    }

    #[test]
    fn test_new_transaction_mirrors_request() {
        let req = TransferRequest {
            external_source_ref: Some("EXT-77".to_string()),
            dest_account_id: Some(id(2)),
            amount: Decimal::new(995, 2),
            category: TransactionCategory::ServicePayment,
            service_id: Some(12),
            ..Default::default()
        };
        let new = req.validate().unwrap().new_transaction();

        assert_eq!(new.amount, Decimal::new(995, 2));
        assert!(new.source_account_id.is_none());
        assert_eq!(new.ext_source_account_id.as_deref(), Some("EXT-77"));
        assert_eq!(new.dest_account_id, Some(id(2)));
        assert!(new.ext_dest_account_id.is_none());
        assert_eq!(new.category, TransactionCategory::ServicePayment);
        assert_eq!(new.service_id, Some(12));
    }
}
