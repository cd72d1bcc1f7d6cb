//! Account model holding the earnings balance and subscription window.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payout destination for withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub bank_name: String,
    pub bank_account: String,
    pub account_holder: String,
}

/// Represents a buyer or creator account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    /// Unique identifier for this account.
    pub id: Uuid,
    /// Human facing account number, allocated from a sequence.
    pub account_number: i64,
    pub display_name: String,
    /// Whether the account sells products.
    pub is_creator: bool,
    /// Withdrawable earnings, also spendable for wallet payments.
    pub balance: BigDecimal,
    /// Current membership plan.
    pub membership_id: Option<Uuid>,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub bank_name: Option<String>,
    pub bank_account: Option<String>,
    pub account_holder: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub display_name: String,
    pub is_creator: bool,
    pub bank_details: Option<BankDetails>,
}

impl Account {
    /// Returns true if the account can cover the given amount.
    pub fn has_sufficient_balance(&self, amount: &BigDecimal) -> bool {
        &self.balance >= amount
    }

    /// Stored bank details, if all parts are present.
    pub fn bank_details(&self) -> Option<BankDetails> {
        match (&self.bank_name, &self.bank_account, &self.account_holder) {
            (Some(bank_name), Some(bank_account), Some(account_holder)) => Some(BankDetails {
                bank_name: bank_name.clone(),
                bank_account: bank_account.clone(),
                account_holder: account_holder.clone(),
            }),
            _ => None,
        }
    }

    /// Whether the subscription window covers `at`.
    pub fn subscription_active_at(&self, at: DateTime<Utc>) -> bool {
        match (self.subscription_start, self.subscription_end) {
            (Some(start), Some(end)) => start <= at && at < end,
            _ => false,
        }
    }
}
