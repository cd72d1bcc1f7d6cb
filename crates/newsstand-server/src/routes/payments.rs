//! Invoice, confirmation and wallet payment endpoints.
//!
//! `POST /webhook` and `GET /check/{invoiceId}` are two doors into the same
//! confirmation function; see [`crate::settlement`].

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::Config;
use crate::credentials;
use crate::error::AppError;
use crate::invoices::{self, WalletPurchase};
use crate::ledger;
use crate::models::{NewOrder, Order, OrderKind, OrderStatus, PaymentMethod};
use crate::settlement::{self, ConfirmationOutcome, ConfirmationSource, SettlementEffects};
use crate::state::AppState;
use crate::subscription::SubscriptionWindow;

/// Header carrying the shared webhook secret.
pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

/// Suggested delay between client polls while an order is pending.
pub const POLL_INTERVAL_SECS: u64 = 3;

/// Order kinds settled through `/check` and `/invoice/{id}/cancel`.
const PAYMENT_KINDS: &[OrderKind] = &[OrderKind::Product, OrderKind::Recharge];

/// Every kind: the gateway calls one webhook URL for all invoices.
const ALL_KINDS: &[OrderKind] = &[OrderKind::Product, OrderKind::Recharge, OrderKind::Membership];

/// Request body for `POST /invoice`.
///
/// With `productId` this buys a product (guest checkout when `buyerId` is
/// absent); with `amount` and `buyerId` it recharges the buyer's balance.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    #[serde(default)]
    pub buyer_id: Option<Uuid>,
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub amount: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    pub order_id: Uuid,
    pub invoice_id: String,
    pub kind: OrderKind,
    pub amount: String,
    pub status: OrderStatus,
    pub qr_text: Option<String>,
    pub qr_image: Option<String>,
}

impl InvoiceResponse {
    pub fn from_order(order: Order) -> Result<Self, AppError> {
        let invoice_id = order
            .invoice_id
            .ok_or_else(|| AppError::Internal(format!("order {} has no invoice", order.id)))?;
        Ok(Self {
            order_id: order.id,
            invoice_id,
            kind: order.kind,
            amount: order.amount.to_string(),
            status: order.status,
            qr_text: order.qr_text,
            qr_image: order.qr_image,
        })
    }
}

/// Gateway push notification. `paymentStatus` is only a hint; the gateway
/// is always asked for the authoritative state.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub invoice_id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub invoice_id: String,
    /// settled, duplicate, pending, failed or unknown.
    pub result: &'static str,
}

/// Response of the poll endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub invoice_id: String,
    pub order_id: Uuid,
    pub kind: OrderKind,
    pub status: OrderStatus,
    /// True once the order has reached a terminal state.
    pub settled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionWindow>,
    /// Present while pending: how long the client should wait before polling again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_after_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPayRequest {
    pub buyer_id: Uuid,
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub membership_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPayResponse {
    pub order_id: Uuid,
    pub invoice_id: Option<String>,
    pub kind: OrderKind,
    pub amount: String,
    pub status: OrderStatus,
    pub balance: String,
    #[serde(flatten)]
    pub effects: SettlementEffects,
}

/// Creates the payments router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/invoice", post(create_invoice))
        .route("/invoice/{invoice_id}/cancel", post(cancel_invoice))
        .route("/webhook", post(handle_webhook))
        .route("/check/{invoice_id}", get(check_invoice))
        .route("/wallet/pay", post(wallet_pay))
        .with_state(state)
}

/// Checks a recharge amount against the configured bounds.
fn validate_recharge_amount(config: &Config, amount: &BigDecimal) -> Result<(), AppError> {
    if amount < &config.min_recharge_amount {
        return Err(AppError::InvalidAmount(format!(
            "minimum recharge is {}",
            config.min_recharge_amount
        )));
    }
    if amount > &config.max_recharge_amount {
        return Err(AppError::InvalidAmount(format!(
            "maximum recharge is {}",
            config.max_recharge_amount
        )));
    }
    Ok(())
}

/// Compares the presented webhook token with the configured secret.
/// Both sides are hashed first so the comparison length never depends on
/// the secret.
fn verify_webhook_token(config: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(secret) = config.webhook_secret.as_deref() else {
        return Ok(());
    };

    let presented = headers
        .get(WEBHOOK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing webhook token".to_string()))?;

    if Sha256::digest(presented.as_bytes()) != Sha256::digest(secret.as_bytes()) {
        return Err(AppError::Unauthorized("invalid webhook token".to_string()));
    }
    Ok(())
}

/// POST /api/v1/invoice
async fn create_invoice(
    State(state): State<AppState>,
    Json(request): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    let (new_order, description) = match (request.product_id, request.amount) {
        (Some(_), Some(_)) => {
            return Err(AppError::BadRequest(
                "give either productId or amount, not both".to_string(),
            ))
        }
        (Some(product_id), None) => {
            let product = settlement::load_product(&state.pool, product_id).await?;
            if let Some(buyer_id) = request.buyer_id {
                ledger::load_account(&state.pool, buyer_id).await?;
            }
            let description = product.title.clone();
            (
                NewOrder::product(request.buyer_id, product.id, product.price, PaymentMethod::Gateway),
                description,
            )
        }
        (None, Some(raw_amount)) => {
            let buyer_id = request.buyer_id.ok_or_else(|| {
                AppError::BadRequest("buyerId is required for a recharge".to_string())
            })?;
            let amount = ledger::parse_amount(&raw_amount)?;
            validate_recharge_amount(&state.config, &amount)?;
            ledger::load_account(&state.pool, buyer_id).await?;
            (
                NewOrder::recharge(buyer_id, amount),
                "Balance recharge".to_string(),
            )
        }
        (None, None) => {
            return Err(AppError::BadRequest(
                "productId or amount is required".to_string(),
            ))
        }
    };

    let order = invoices::issue_gateway_invoice(&state, new_order, &description).await?;
    Ok((StatusCode::CREATED, Json(InvoiceResponse::from_order(order)?)))
}

/// POST /api/v1/invoice/{invoiceId}/cancel
async fn cancel_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let order = invoices::cancel_invoice(&state, &invoice_id, PAYMENT_KINDS).await?;
    Ok(Json(InvoiceResponse::from_order(order)?))
}

/// POST /api/v1/webhook
///
/// Answers 2xx for every notification that was handled, including
/// duplicates, still-pending invoices and invoices this server never issued.
/// Internal failures answer 5xx so the gateway redelivers.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<WebhookRequest>,
) -> Result<Json<WebhookResponse>, AppError> {
    verify_webhook_token(&state.config, &headers)?;

    tracing::debug!(
        invoice_id = %request.invoice_id,
        hint = request.payment_status.as_deref().unwrap_or("none"),
        "Webhook received"
    );

    let outcome = match settlement::confirm_invoice(
        &state,
        &request.invoice_id,
        ConfirmationSource::Webhook,
        ALL_KINDS,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(AppError::NotFound(_)) => {
            tracing::warn!(invoice_id = %request.invoice_id, "Webhook for unknown invoice");
            return Ok(Json(WebhookResponse {
                invoice_id: request.invoice_id,
                result: "unknown",
            }));
        }
        Err(e) => return Err(e),
    };

    let result = match outcome {
        ConfirmationOutcome::Settled { .. } => "settled",
        ConfirmationOutcome::AlreadySettled(_) => "duplicate",
        ConfirmationOutcome::StillPending(_) => "pending",
        ConfirmationOutcome::Failed(_) => "failed",
    };

    Ok(Json(WebhookResponse {
        invoice_id: request.invoice_id,
        result,
    }))
}

/// Builds the poll response for a confirmation outcome.
///
/// A completed product order that this call did not settle (the webhook won
/// the race, or the client polls again) still gets its download link back as
/// long as the credential is unused and unexpired.
pub(crate) async fn check_response(
    state: &AppState,
    invoice_id: String,
    outcome: ConfirmationOutcome,
) -> Result<CheckResponse, AppError> {
    let (order, effects) = match outcome {
        ConfirmationOutcome::Settled { order, effects } => (order, Some(effects)),
        other => (other.into_order(), None),
    };

    let mut download = effects.as_ref().and_then(|e| e.download.clone());
    if download.is_none() && order.is_completed() && order.kind == OrderKind::Product {
        download = credentials::find_active_for_order(&state.pool, &state.config, order.id).await?;
    }

    let subscription = match (&effects, order.kind, order.is_completed()) {
        (Some(effects), _, _) => effects.subscription,
        (None, OrderKind::Membership, true) => {
            let buyer = order.buyer_id.ok_or_else(|| {
                AppError::Internal(format!("membership order {} has no buyer", order.id))
            })?;
            crate::subscription::current_window(&ledger::load_account(&state.pool, buyer).await?)
        }
        _ => None,
    };

    Ok(CheckResponse {
        invoice_id,
        order_id: order.id,
        kind: order.kind,
        status: order.status,
        settled: order.status.is_terminal(),
        download_url: download.as_ref().map(|d| d.url.clone()),
        download_expires_at: download.map(|d| d.expires_at),
        subscription,
        poll_after_seconds: order.is_pending().then_some(POLL_INTERVAL_SECS),
    })
}

/// GET /api/v1/check/{invoiceId}
async fn check_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Result<Json<CheckResponse>, AppError> {
    let outcome =
        settlement::confirm_invoice(&state, &invoice_id, ConfirmationSource::Poll, PAYMENT_KINDS)
            .await?;
    Ok(Json(check_response(&state, invoice_id, outcome).await?))
}

/// POST /api/v1/wallet/pay
///
/// Pays for a product or a membership from the buyer's balance. Recharges
/// cannot be paid from the balance they would top up.
async fn wallet_pay(
    State(state): State<AppState>,
    Json(request): Json<WalletPayRequest>,
) -> Result<(StatusCode, Json<WalletPayResponse>), AppError> {
    let purchase = match (request.product_id, request.membership_id) {
        (Some(product_id), None) => WalletPurchase::Product(product_id),
        (None, Some(membership_id)) => WalletPurchase::Membership(membership_id),
        _ => {
            return Err(AppError::BadRequest(
                "give exactly one of productId or membershipId".to_string(),
            ))
        }
    };

    let (order, effects) = invoices::pay_with_wallet(&state, request.buyer_id, purchase).await?;
    let buyer = ledger::load_account(&state.pool, request.buyer_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(WalletPayResponse {
            order_id: order.id,
            invoice_id: order.invoice_id,
            kind: order.kind,
            amount: order.amount.to_string(),
            status: order.status,
            balance: buyer.balance.to_string(),
            effects,
        }),
    ))
}
