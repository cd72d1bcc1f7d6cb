//! Withdrawal request model and its state machine.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use super::account::BankDetails;

/// Possible states of a withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    /// Requested by the creator, balance untouched.
    Pending,
    /// Approved by an administrator; amount debited.
    Approved,
    /// Refused; any debit has been refunded.
    Rejected,
    /// Paid out.
    Completed,
}

/// Effect a transition has on the creator's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceEffect {
    None,
    Debit,
    Refund,
}

impl WithdrawalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Completed => "completed",
        }
    }

    /// Balance effect of moving from `self` to `next`, or `None` if the
    /// transition is not allowed.
    pub fn transition(self, next: WithdrawalStatus) -> Option<BalanceEffect> {
        use WithdrawalStatus::*;
        if self.is_final() {
            return None;
        }
        match (self, next) {
            (Pending, Approved) => Some(BalanceEffect::Debit),
            (Pending, Rejected) => Some(BalanceEffect::None),
            (Approved, Completed) => Some(BalanceEffect::None),
            (Approved, Rejected) => Some(BalanceEffect::Refund),
            _ => None,
        }
    }

    /// Rejected and completed requests accept no further transitions.
    pub fn is_final(self) -> bool {
        matches!(self, WithdrawalStatus::Rejected | WithdrawalStatus::Completed)
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A creator's payout request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub amount: BigDecimal,
    pub status: WithdrawalStatus,
    pub bank_name: Option<String>,
    pub bank_account: Option<String>,
    pub account_holder: Option<String>,
    pub admin_notes: Option<String>,
    /// Administrator who last moved the request.
    pub processed_by: Option<Uuid>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching [`WithdrawalRequest`].
pub const WITHDRAWAL_COLUMNS: &str = "id, creator_id, amount, status, bank_name, bank_account, \
     account_holder, admin_notes, processed_by, processed_at, created_at, updated_at";

/// Data required to create a new withdrawal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWithdrawalRequest {
    pub creator_id: Uuid,
    pub amount: BigDecimal,
    pub bank_details: Option<BankDetails>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use WithdrawalStatus::*;

    #[test]
    fn test_withdrawal_status_serialization() {
        assert_eq!(serde_json::to_string(&Pending).unwrap(), "\"pending\"");
        assert_eq!(serde_json::to_string(&Completed).unwrap(), "\"completed\"");
        assert_eq!(
            serde_json::from_str::<WithdrawalStatus>("\"rejected\"").unwrap(),
            Rejected
        );
    }

    #[test]
    fn test_allowed_transitions() {
        assert_eq!(Pending.transition(Approved), Some(BalanceEffect::Debit));
        assert_eq!(Pending.transition(Rejected), Some(BalanceEffect::None));
        assert_eq!(Approved.transition(Completed), Some(BalanceEffect::None));
        assert_eq!(Approved.transition(Rejected), Some(BalanceEffect::Refund));
    }

    #[test]
    fn test_forbidden_transitions() {
        assert_eq!(Pending.transition(Completed), None);
        assert_eq!(Pending.transition(Pending), None);
        assert_eq!(Approved.transition(Approved), None);
        assert_eq!(Approved.transition(Pending), None);
        for next in [Pending, Approved, Rejected, Completed] {
            assert_eq!(Rejected.transition(next), None);
            assert_eq!(Completed.transition(next), None);
        }
    }

    #[test]
    fn test_final_states() {
        assert!(!Pending.is_final());
        assert!(!Approved.is_final());
        assert!(Rejected.is_final());
        assert!(Completed.is_final());
    }
}
