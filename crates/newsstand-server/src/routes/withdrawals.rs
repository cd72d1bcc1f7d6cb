//! Withdrawal request endpoints.
//!
//! A request moves pending → approved → completed, or to rejected from
//! pending or approved. The creator's balance is debited at approval (after
//! re-checking it under the account lock) and refunded if an approved
//! request is later rejected.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger;
use crate::models::{
    BalanceEffect, BankDetails, NewLedgerEntry, NewWithdrawalRequest, WithdrawalRequest,
    WithdrawalStatus, WITHDRAWAL_COLUMNS,
};
use crate::state::AppState;

/// Request body for `POST /withdrawals`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWithdrawalRequest {
    pub creator_id: Uuid,
    /// Decimal string, e.g. "3000.00".
    pub amount: String,
    /// Overrides the bank details stored on the account.
    #[serde(default)]
    pub bank_details: Option<BankDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListWithdrawalsQuery {
    pub creator_id: Uuid,
}

/// Request body for `PUT /withdrawals/{id}/status`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWithdrawalStatusRequest {
    pub status: String,
    /// Administrator performing the transition.
    pub admin_id: Uuid,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResponse {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub amount: String,
    pub status: WithdrawalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_details: Option<BankDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
    pub created_at: String,
}

impl From<WithdrawalRequest> for WithdrawalResponse {
    fn from(request: WithdrawalRequest) -> Self {
        let bank_details = match (request.bank_name, request.bank_account, request.account_holder) {
            (Some(bank_name), Some(bank_account), Some(account_holder)) => Some(BankDetails {
                bank_name,
                bank_account,
                account_holder,
            }),
            _ => None,
        };
        Self {
            id: request.id,
            creator_id: request.creator_id,
            amount: request.amount.to_string(),
            status: request.status,
            bank_details,
            admin_notes: request.admin_notes,
            processed_by: request.processed_by,
            processed_at: request.processed_at.map(|t| t.to_rfc3339()),
            created_at: request.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWithdrawalStatusResponse {
    #[serde(flatten)]
    pub withdrawal: WithdrawalResponse,
    pub previous_status: WithdrawalStatus,
    /// Creator balance after the transition.
    pub creator_balance: String,
}

/// Creates the withdrawals router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_withdrawals).post(create_withdrawal))
        .route("/{id}/status", put(update_withdrawal_status))
        .with_state(state)
}

/// Parses a target status from the admin request.
fn parse_withdrawal_status(raw: &str) -> Result<WithdrawalStatus, AppError> {
    match raw {
        "approved" => Ok(WithdrawalStatus::Approved),
        "rejected" => Ok(WithdrawalStatus::Rejected),
        "completed" => Ok(WithdrawalStatus::Completed),
        "pending" => Ok(WithdrawalStatus::Pending),
        other => Err(AppError::BadRequest(format!(
            "Unknown withdrawal status: {}. Expected approved, rejected or completed",
            other
        ))),
    }
}

async fn lock_withdrawal(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<WithdrawalRequest, AppError> {
    let query = format!(
        "SELECT {} FROM withdrawal_requests WHERE id = $1 FOR UPDATE",
        WITHDRAWAL_COLUMNS
    );
    sqlx::query_as(&query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Withdrawal request not found: {}", id)))
}

/// POST /api/v1/withdrawals
///
/// Records a payout request. The balance is only checked here, not held:
/// the debit happens at approval, where the check is repeated.
async fn create_withdrawal(
    State(state): State<AppState>,
    Json(request): Json<CreateWithdrawalRequest>,
) -> Result<(StatusCode, Json<WithdrawalResponse>), AppError> {
    // Step 1: Validate the amount
    let amount = ledger::parse_amount(&request.amount)?;
    if amount < state.config.min_withdrawal_amount {
        return Err(AppError::InvalidAmount(format!(
            "minimum withdrawal is {}",
            state.config.min_withdrawal_amount
        )));
    }

    // Step 2: Load the creator and check the live balance
    let creator = ledger::load_account(&state.pool, request.creator_id).await?;
    if !creator.is_creator {
        return Err(AppError::BadRequest(
            "only creator accounts can withdraw earnings".to_string(),
        ));
    }
    if !creator.has_sufficient_balance(&amount) {
        return Err(AppError::InsufficientBalance {
            available: creator.balance,
            requested: amount,
        });
    }

    // Step 3: Snapshot bank details
    let new_request = NewWithdrawalRequest {
        creator_id: creator.id,
        amount,
        bank_details: request.bank_details.or_else(|| creator.bank_details()),
    };
    let bank = new_request.bank_details.as_ref();

    // Step 4: Insert the pending request
    let query = format!(
        "INSERT INTO withdrawal_requests (creator_id, amount, bank_name, bank_account, account_holder) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {}",
        WITHDRAWAL_COLUMNS
    );
    let withdrawal: WithdrawalRequest = sqlx::query_as(&query)
        .bind(new_request.creator_id)
        .bind(&new_request.amount)
        .bind(bank.map(|b| b.bank_name.as_str()))
        .bind(bank.map(|b| b.bank_account.as_str()))
        .bind(bank.map(|b| b.account_holder.as_str()))
        .fetch_one(&state.pool)
        .await?;

    tracing::info!(
        withdrawal_id = %withdrawal.id,
        creator_id = %withdrawal.creator_id,
        amount = %withdrawal.amount,
        "Withdrawal requested"
    );

    Ok((StatusCode::CREATED, Json(withdrawal.into())))
}

/// GET /api/v1/withdrawals?creatorId=...
async fn list_withdrawals(
    State(state): State<AppState>,
    Query(query): Query<ListWithdrawalsQuery>,
) -> Result<Json<Vec<WithdrawalResponse>>, AppError> {
    let sql = format!(
        "SELECT {} FROM withdrawal_requests WHERE creator_id = $1 ORDER BY created_at DESC",
        WITHDRAWAL_COLUMNS
    );
    let requests: Vec<WithdrawalRequest> = sqlx::query_as(&sql)
        .bind(query.creator_id)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(requests.into_iter().map(WithdrawalResponse::from).collect()))
}

/// PUT /api/v1/withdrawals/{id}/status
///
/// This endpoint:
/// 1. Locks the withdrawal request row
/// 2. Validates the transition against the current status
/// 3. Applies the balance effect under the creator's row lock
/// 4. Records the new status with processor and notes
///
/// Two concurrent approvals for the same creator serialize on the creator
/// row, and the second one sees the already debited balance.
async fn update_withdrawal_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateWithdrawalStatusRequest>,
) -> Result<Json<UpdateWithdrawalStatusResponse>, AppError> {
    let next = parse_withdrawal_status(&request.status)?;

    let mut tx = state.pool.begin().await?;

    // Step 1: Lock the request
    let withdrawal = lock_withdrawal(&mut tx, id).await?;
    let previous = withdrawal.status;

    // Step 2: Validate the transition
    let effect = previous
        .transition(next)
        .ok_or_else(|| AppError::InvalidStateTransition {
            from: previous.to_string(),
            to: next.to_string(),
        })?;

    // Step 3: Apply the balance effect
    let creator = ledger::lock_account(&mut tx, withdrawal.creator_id).await?;
    let creator_balance = match effect {
        BalanceEffect::Debit => {
            if !creator.has_sufficient_balance(&withdrawal.amount) {
                return Err(AppError::InsufficientBalance {
                    available: creator.balance,
                    requested: withdrawal.amount,
                });
            }
            ledger::apply_entry(
                &mut tx,
                &NewLedgerEntry::withdrawal_debit(
                    creator.id,
                    withdrawal.id,
                    withdrawal.amount.clone(),
                ),
            )
            .await?
        }
        BalanceEffect::Refund => {
            ledger::apply_entry(
                &mut tx,
                &NewLedgerEntry::withdrawal_refund(
                    creator.id,
                    withdrawal.id,
                    withdrawal.amount.clone(),
                ),
            )
            .await?
        }
        BalanceEffect::None => creator.balance.clone(),
    };

    // Step 4: Record the transition
    let query = format!(
        "UPDATE withdrawal_requests \
         SET status = $2, admin_notes = COALESCE($3, admin_notes), processed_by = $4, \
             processed_at = NOW(), updated_at = NOW() \
         WHERE id = $1 RETURNING {}",
        WITHDRAWAL_COLUMNS
    );
    let updated: WithdrawalRequest = sqlx::query_as(&query)
        .bind(withdrawal.id)
        .bind(next)
        .bind(request.notes.as_deref())
        .bind(request.admin_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        withdrawal_id = %updated.id,
        creator_id = %updated.creator_id,
        from = %previous,
        to = %next,
        admin_id = %request.admin_id,
        "Withdrawal status changed"
    );

    Ok(Json(UpdateWithdrawalStatusResponse {
        withdrawal: updated.into(),
        previous_status: previous,
        creator_balance: creator_balance.to_string(),
    }))
}
