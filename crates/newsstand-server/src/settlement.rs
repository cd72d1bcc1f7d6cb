//! Payment confirmation: the single transition from a pending order to its
//! settled state.
//!
//! Gateway webhooks and client polls both land in [`confirm_invoice`]. The
//! order row lock decides the race: whichever caller commits first applies
//! the settlement effects, every later caller observes a non-pending order
//! and returns [`ConfirmationOutcome::AlreadySettled`].

use bigdecimal::BigDecimal;
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::credentials::{self, IssuedCredential};
use crate::error::AppError;
use crate::gateway::GatewayPaymentStatus;
use crate::ledger;
use crate::models::{NewLedgerEntry, Order, OrderKind, Product, ORDER_COLUMNS};
use crate::state::AppState;
use crate::subscription::{self, SubscriptionWindow};

/// Where a confirmation attempt came from. Only used for logging; both
/// sources are verified against the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationSource {
    Webhook,
    Poll,
}

impl ConfirmationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationSource::Webhook => "webhook",
            ConfirmationSource::Poll => "poll",
        }
    }
}

/// Side effects applied when an order completes.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementEffects {
    /// Net amount credited to the product's creator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_credit: Option<BigDecimal>,
    /// Amount added to the buyer's balance by a recharge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recharged: Option<BigDecimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<IssuedCredential>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionWindow>,
}

/// Result of one confirmation attempt.
#[derive(Debug)]
pub enum ConfirmationOutcome {
    /// This call completed the order and applied its effects.
    Settled {
        order: Order,
        effects: SettlementEffects,
    },
    /// Another call got there first; nothing was changed.
    AlreadySettled(Order),
    /// The gateway has no payment yet, or could not be asked.
    StillPending(Order),
    /// The gateway reported the payment failed; the order is now failed.
    Failed(Order),
}

impl ConfirmationOutcome {
    pub fn order(&self) -> &Order {
        match self {
            ConfirmationOutcome::Settled { order, .. }
            | ConfirmationOutcome::AlreadySettled(order)
            | ConfirmationOutcome::StillPending(order)
            | ConfirmationOutcome::Failed(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            ConfirmationOutcome::Settled { order, .. }
            | ConfirmationOutcome::AlreadySettled(order)
            | ConfirmationOutcome::StillPending(order)
            | ConfirmationOutcome::Failed(order) => order,
        }
    }
}

/// Reads an order by gateway invoice id without locking.
pub async fn find_order_by_invoice<'e, E>(
    executor: E,
    invoice_id: &str,
) -> Result<Option<Order>, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = format!("SELECT {} FROM orders WHERE invoice_id = $1", ORDER_COLUMNS);
    let order = sqlx::query_as(&query)
        .bind(invoice_id)
        .fetch_optional(executor)
        .await?;
    Ok(order)
}

/// Loads an order by invoice id and holds its row lock until `tx` ends.
pub async fn lock_order_by_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: &str,
) -> Result<Order, AppError> {
    let query = format!(
        "SELECT {} FROM orders WHERE invoice_id = $1 FOR UPDATE",
        ORDER_COLUMNS
    );
    sqlx::query_as(&query)
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Invoice not found: {}", invoice_id)))
}

pub async fn load_product<'e, E>(executor: E, product_id: Uuid) -> Result<Product, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as(
        r#"
        SELECT id, creator_id, title, price, file_key, created_at
        FROM products
        WHERE id = $1
        "#,
    )
    .bind(product_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Product not found: {}", product_id)))
}

/// Confirms a gateway invoice, settling its order at most once.
///
/// 1. Reads the order without a lock; terminal orders return immediately.
/// 2. Asks the gateway for the payment state. Gateway errors leave the order
///    pending and are only logged.
/// 3. On payment, completes the order under its row lock and applies the
///    settlement effects in the same transaction.
///
/// Orders whose kind is not in `kinds` are reported as not found, so the
/// membership endpoints cannot settle product invoices and vice versa.
pub async fn confirm_invoice(
    state: &AppState,
    invoice_id: &str,
    source: ConfirmationSource,
    kinds: &[OrderKind],
) -> Result<ConfirmationOutcome, AppError> {
    let order = find_order_by_invoice(&state.pool, invoice_id)
        .await?
        .filter(|order| kinds.contains(&order.kind))
        .ok_or_else(|| AppError::NotFound(format!("Invoice not found: {}", invoice_id)))?;

    if order.status.is_terminal() {
        tracing::debug!(
            invoice_id = %invoice_id,
            status = %order.status,
            source = source.as_str(),
            "Duplicate confirmation ignored"
        );
        return Ok(ConfirmationOutcome::AlreadySettled(order));
    }

    let payment = match state.gateway.check_invoice(invoice_id).await {
        Ok(payment) => payment,
        Err(e) => {
            tracing::warn!(
                invoice_id = %invoice_id,
                source = source.as_str(),
                error = %e,
                "Gateway check failed, order stays pending"
            );
            return Ok(ConfirmationOutcome::StillPending(order));
        }
    };

    match payment {
        GatewayPaymentStatus::Paid {
            transaction_id,
            paid_amount,
        } => {
            if paid_amount < order.amount {
                tracing::error!(
                    invoice_id = %invoice_id,
                    order_id = %order.id,
                    expected = %order.amount,
                    paid = %paid_amount,
                    "Gateway reports underpayment, order left pending"
                );
                return Ok(ConfirmationOutcome::StillPending(order));
            }
            complete_order(state, invoice_id, &transaction_id, source).await
        }
        GatewayPaymentStatus::Pending => Ok(ConfirmationOutcome::StillPending(order)),
        GatewayPaymentStatus::Failed { reason } => {
            fail_order(state, invoice_id, &reason, source).await
        }
    }
}

async fn complete_order(
    state: &AppState,
    invoice_id: &str,
    transaction_id: &str,
    source: ConfirmationSource,
) -> Result<ConfirmationOutcome, AppError> {
    let mut tx = state.pool.begin().await?;

    let locked = lock_order_by_invoice(&mut tx, invoice_id).await?;
    if locked.status.is_terminal() {
        return Ok(ConfirmationOutcome::AlreadySettled(locked));
    }

    let query = format!(
        "UPDATE orders \
         SET status = 'completed', transaction_id = $2, settled_at = NOW(), updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {}",
        ORDER_COLUMNS
    );
    let order: Order = sqlx::query_as(&query)
        .bind(locked.id)
        .bind(transaction_id)
        .fetch_one(&mut *tx)
        .await?;

    let effects = apply_settlement_effects(&mut tx, &state.config, &order).await?;

    tx.commit().await?;

    tracing::info!(
        order_id = %order.id,
        invoice_id = %invoice_id,
        kind = ?order.kind,
        amount = %order.amount,
        source = source.as_str(),
        "Order settled"
    );

    Ok(ConfirmationOutcome::Settled { order, effects })
}

async fn fail_order(
    state: &AppState,
    invoice_id: &str,
    reason: &str,
    source: ConfirmationSource,
) -> Result<ConfirmationOutcome, AppError> {
    let mut tx = state.pool.begin().await?;

    let locked = lock_order_by_invoice(&mut tx, invoice_id).await?;
    if locked.status.is_terminal() {
        return Ok(ConfirmationOutcome::AlreadySettled(locked));
    }

    let query = format!(
        "UPDATE orders SET status = 'failed', updated_at = NOW() WHERE id = $1 RETURNING {}",
        ORDER_COLUMNS
    );
    let order: Order = sqlx::query_as(&query)
        .bind(locked.id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        order_id = %order.id,
        invoice_id = %invoice_id,
        reason = %reason,
        source = source.as_str(),
        "Order failed"
    );

    Ok(ConfirmationOutcome::Failed(order))
}

/// Applies what a completed order entitles its parties to.
///
/// Must run in the transaction that moved the order to `completed`.
pub async fn apply_settlement_effects(
    tx: &mut Transaction<'_, Postgres>,
    config: &Config,
    order: &Order,
) -> Result<SettlementEffects, AppError> {
    let mut effects = SettlementEffects::default();

    match order.kind {
        OrderKind::Product => {
            let product_id = order
                .product_id
                .ok_or_else(|| AppError::Internal(format!("product order {} has no product", order.id)))?;
            let product = load_product(&mut **tx, product_id).await?;

            let creator = ledger::lock_account(tx, product.creator_id).await?;
            let commission =
                subscription::commission_percent(&mut **tx, &creator, &config.default_commission_percent)
                    .await?;
            let credit =
                ledger::credit_sale(tx, creator.id, order.id, &order.amount, &commission).await?;

            effects.creator_credit = Some(credit);
            effects.download = Some(credentials::issue(tx, config, order, product.id).await?);
        }
        OrderKind::Recharge => {
            let buyer_id = order
                .buyer_id
                .ok_or_else(|| AppError::Internal(format!("recharge order {} has no buyer", order.id)))?;
            ledger::lock_account(tx, buyer_id).await?;
            ledger::apply_entry(
                tx,
                &NewLedgerEntry::recharge_credit(buyer_id, order.id, order.amount.clone()),
            )
            .await?;
            effects.recharged = Some(order.amount.clone());
        }
        OrderKind::Membership => {
            let (buyer_id, membership_id) = order.buyer_id.zip(order.membership_id).ok_or_else(|| {
                AppError::Internal(format!("membership order {} is incomplete", order.id))
            })?;
            effects.subscription = Some(subscription::renew(tx, buyer_id, membership_id).await?);
        }
    }

    Ok(effects)
}
