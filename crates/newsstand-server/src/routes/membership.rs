//! Membership purchase and subscription endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::payments::{check_response, CheckResponse, InvoiceResponse};
use crate::error::AppError;
use crate::invoices;
use crate::ledger;
use crate::models::{NewOrder, OrderKind, PaymentMethod};
use crate::settlement::{self, ConfirmationSource};
use crate::state::AppState;
use crate::subscription::{self, SubscriptionStatus};

const MEMBERSHIP_KINDS: &[OrderKind] = &[OrderKind::Membership];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipInvoiceRequest {
    pub creator_id: Uuid,
    pub membership_id: Uuid,
}

/// Creates the membership router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/invoice", post(create_membership_invoice))
        .route("/invoice/{invoice_id}/cancel", post(cancel_membership_invoice))
        .route("/check/{invoice_id}", get(check_membership_invoice))
        .route("/status/{creator_id}", get(get_subscription_status))
        .with_state(state)
}

/// POST /api/v1/membership/invoice
///
/// Prices the order from the plan at issuance; later price changes do not
/// affect invoices already issued.
async fn create_membership_invoice(
    State(state): State<AppState>,
    Json(request): Json<MembershipInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    let creator = ledger::load_account(&state.pool, request.creator_id).await?;
    if !creator.is_creator {
        return Err(AppError::BadRequest(
            "only creator accounts can buy a membership".to_string(),
        ));
    }

    let membership = subscription::load_membership(&state.pool, request.membership_id).await?;
    let description = format!("Membership: {}", membership.name);
    let new_order = NewOrder::membership(
        creator.id,
        membership.id,
        membership.price,
        PaymentMethod::Gateway,
    );

    let order = invoices::issue_gateway_invoice(&state, new_order, &description).await?;
    Ok((StatusCode::CREATED, Json(InvoiceResponse::from_order(order)?)))
}

/// POST /api/v1/membership/invoice/{invoiceId}/cancel
async fn cancel_membership_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let order = invoices::cancel_invoice(&state, &invoice_id, MEMBERSHIP_KINDS).await?;
    Ok(Json(InvoiceResponse::from_order(order)?))
}

/// GET /api/v1/membership/check/{invoiceId}
async fn check_membership_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Result<Json<CheckResponse>, AppError> {
    let outcome = settlement::confirm_invoice(
        &state,
        &invoice_id,
        ConfirmationSource::Poll,
        MEMBERSHIP_KINDS,
    )
    .await?;
    Ok(Json(check_response(&state, invoice_id, outcome).await?))
}

/// GET /api/v1/membership/status/{creatorId}
async fn get_subscription_status(
    State(state): State<AppState>,
    Path(creator_id): Path<Uuid>,
) -> Result<Json<SubscriptionStatus>, AppError> {
    Ok(Json(subscription::status(&state.pool, creator_id).await?))
}
