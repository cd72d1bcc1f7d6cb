//! Account creation and balance endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger;
use crate::models::{Account, BankDetails, LedgerEntry, NewAccount};
use crate::state::AppState;

/// Number of ledger entries returned with a balance.
const RECENT_ENTRIES: i64 = 10;

/// Request body for creating an account.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub display_name: String,
    #[serde(default)]
    pub is_creator: bool,
    #[serde(default)]
    pub bank_details: Option<BankDetails>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: Uuid,
    pub account_number: i64,
    pub display_name: String,
    pub is_creator: bool,
    pub balance: String,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            account_number: account.account_number,
            display_name: account.display_name,
            is_creator: account.is_creator,
            balance: account.balance.to_string(),
        }
    }
}

/// One journal line in a balance response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub id: Uuid,
    pub entry_type: crate::models::LedgerEntryType,
    pub amount: String,
    pub order_id: Option<Uuid>,
    pub withdrawal_id: Option<Uuid>,
    pub created_at: String,
}

impl From<LedgerEntry> for LedgerRecord {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            entry_type: entry.entry_type,
            amount: entry.amount.to_string(),
            order_id: entry.order_id,
            withdrawal_id: entry.withdrawal_id,
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub account_number: i64,
    pub balance: String,
    pub recent_entries: Vec<LedgerRecord>,
}

/// Creates the accounts router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_account))
        .route("/{id}/balance", get(get_balance))
        .with_state(state)
}

fn validate_new_account(account: &NewAccount) -> Result<(), AppError> {
    if account.display_name.trim().is_empty() {
        return Err(AppError::BadRequest("displayName must not be empty".to_string()));
    }
    if let Some(bank) = &account.bank_details {
        if bank.bank_name.trim().is_empty()
            || bank.bank_account.trim().is_empty()
            || bank.account_holder.trim().is_empty()
        {
            return Err(AppError::BadRequest(
                "bank details must include bank name, account and holder".to_string(),
            ));
        }
    }
    Ok(())
}

/// POST /api/v1/accounts
///
/// The account number comes from `account_number_seq`, so concurrent
/// registrations never collide.
async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    let new_account = NewAccount {
        display_name: request.display_name.trim().to_string(),
        is_creator: request.is_creator,
        bank_details: request.bank_details,
    };
    validate_new_account(&new_account)?;

    let bank = new_account.bank_details.as_ref();
    let account: Account = sqlx::query_as(
        r#"
        INSERT INTO accounts (display_name, is_creator, bank_name, bank_account, account_holder)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, account_number, display_name, is_creator, balance, membership_id,
                  subscription_start, subscription_end, bank_name, bank_account,
                  account_holder, created_at, updated_at
        "#,
    )
    .bind(&new_account.display_name)
    .bind(new_account.is_creator)
    .bind(bank.map(|b| b.bank_name.as_str()))
    .bind(bank.map(|b| b.bank_account.as_str()))
    .bind(bank.map(|b| b.account_holder.as_str()))
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        account_id = %account.id,
        account_number = account.account_number,
        is_creator = account.is_creator,
        "Account created"
    );

    Ok((StatusCode::CREATED, Json(account.into())))
}

/// GET /api/v1/accounts/{id}/balance
async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account = ledger::load_account(&state.pool, id).await?;
    let recent = ledger::recent_entries(&state.pool, id, RECENT_ENTRIES).await?;

    Ok(Json(BalanceResponse {
        account_id: account.id,
        account_number: account.account_number,
        balance: account.balance.to_string(),
        recent_entries: recent.into_iter().map(LedgerRecord::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account(name: &str, bank: Option<BankDetails>) -> NewAccount {
        NewAccount {
            display_name: name.to_string(),
            is_creator: true,
            bank_details: bank,
        }
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        assert!(validate_new_account(&new_account("   ", None)).is_err());
        assert!(validate_new_account(&new_account("Reporter", None)).is_ok());
    }

    #[test]
    fn test_validate_rejects_partial_bank_details() {
        let bank = BankDetails {
            bank_name: "Khan Bank".to_string(),
            bank_account: "".to_string(),
            account_holder: "B. Bold".to_string(),
        };
        assert!(validate_new_account(&new_account("Reporter", Some(bank))).is_err());
    }

    #[test]
    fn test_create_request_defaults() {
        let request: CreateAccountRequest =
            serde_json::from_str(r#"{"displayName": "Reader"}"#).unwrap();
        assert!(!request.is_creator);
        assert!(request.bank_details.is_none());
    }
}
