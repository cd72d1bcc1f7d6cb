//! Earnings ledger: append-only journal of every balance movement.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Kinds of balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "ledger_entry_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// Creator's net share of a completed sale.
    SaleCredit,
    /// Balance top-up paid through the gateway.
    RechargeCredit,
    /// Purchase paid from the balance.
    WalletDebit,
    /// Funds reserved by an approved withdrawal.
    WithdrawalDebit,
    /// Funds returned by rejecting an approved withdrawal.
    WithdrawalRefund,
}

impl LedgerEntryType {
    /// Whether this entry increases the balance.
    pub fn is_credit(self) -> bool {
        matches!(
            self,
            LedgerEntryType::SaleCredit
                | LedgerEntryType::RechargeCredit
                | LedgerEntryType::WithdrawalRefund
        )
    }
}

/// Represents an immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Account whose balance moved.
    pub account_id: Uuid,
    pub entry_type: LedgerEntryType,
    /// Always positive; direction follows from the entry type.
    pub amount: BigDecimal,
    pub order_id: Option<Uuid>,
    pub withdrawal_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Data required to create a new ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub account_id: Uuid,
    pub entry_type: LedgerEntryType,
    pub amount: BigDecimal,
    pub order_id: Option<Uuid>,
    pub withdrawal_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

impl NewLedgerEntry {
    /// Creator's share of a sale.
    pub fn sale_credit(
        creator_id: Uuid,
        order_id: Uuid,
        amount: BigDecimal,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            account_id: creator_id,
            entry_type: LedgerEntryType::SaleCredit,
            amount,
            order_id: Some(order_id),
            withdrawal_id: None,
            metadata,
        }
    }

    /// Balance top-up.
    pub fn recharge_credit(account_id: Uuid, order_id: Uuid, amount: BigDecimal) -> Self {
        Self {
            account_id,
            entry_type: LedgerEntryType::RechargeCredit,
            amount,
            order_id: Some(order_id),
            withdrawal_id: None,
            metadata: serde_json::json!({}),
        }
    }

    /// Purchase paid from the balance.
    pub fn wallet_debit(account_id: Uuid, order_id: Uuid, amount: BigDecimal) -> Self {
        Self {
            account_id,
            entry_type: LedgerEntryType::WalletDebit,
            amount,
            order_id: Some(order_id),
            withdrawal_id: None,
            metadata: serde_json::json!({}),
        }
    }

    /// Debit on withdrawal approval.
    pub fn withdrawal_debit(creator_id: Uuid, withdrawal_id: Uuid, amount: BigDecimal) -> Self {
        Self {
            account_id: creator_id,
            entry_type: LedgerEntryType::WithdrawalDebit,
            amount,
            order_id: None,
            withdrawal_id: Some(withdrawal_id),
            metadata: serde_json::json!({}),
        }
    }

    /// Refund on rejection of an approved withdrawal.
    pub fn withdrawal_refund(creator_id: Uuid, withdrawal_id: Uuid, amount: BigDecimal) -> Self {
        Self {
            account_id: creator_id,
            entry_type: LedgerEntryType::WithdrawalRefund,
            amount,
            order_id: None,
            withdrawal_id: Some(withdrawal_id),
            metadata: serde_json::json!({}),
        }
    }
}
