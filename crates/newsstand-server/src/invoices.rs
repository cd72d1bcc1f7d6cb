//! Invoice issuance: gateway invoices, internal-balance payments and
//! cancellation of unpaid invoices.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::gateway::{GatewayPaymentStatus, InvoiceRequest};
use crate::ledger;
use crate::models::{
    NewLedgerEntry, NewOrder, Order, OrderKind, OrderStatus, PaymentMethod, ORDER_COLUMNS,
};
use crate::settlement::{self, ConfirmationOutcome, ConfirmationSource, SettlementEffects};
use crate::state::AppState;
use crate::subscription;

/// What an internal-balance payment buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletPurchase {
    Product(Uuid),
    Membership(Uuid),
}

async fn insert_order<'e, E>(
    executor: E,
    new_order: &NewOrder,
    status: OrderStatus,
    invoice_id: Option<&str>,
    settled_at: Option<DateTime<Utc>>,
) -> Result<Order, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = format!(
        "INSERT INTO orders \
         (buyer_id, kind, product_id, membership_id, amount, payment_method, status, invoice_id, settled_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {}",
        ORDER_COLUMNS
    );
    let order = sqlx::query_as(&query)
        .bind(new_order.buyer_id)
        .bind(new_order.kind)
        .bind(new_order.product_id)
        .bind(new_order.membership_id)
        .bind(&new_order.amount)
        .bind(new_order.payment_method)
        .bind(status)
        .bind(invoice_id)
        .bind(settled_at)
        .fetch_one(executor)
        .await?;
    Ok(order)
}

/// Closes an order whose invoice could not be issued.
async fn mark_failed(state: &AppState, order_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE orders SET status = 'failed', updated_at = NOW() WHERE id = $1 AND status = 'pending'",
    )
    .bind(order_id)
    .execute(&state.pool)
    .await?;
    Ok(())
}

/// Creates a pending order and asks the gateway for a payable QR invoice.
///
/// The order is committed before the gateway is contacted, so a crash in
/// between leaves a pending order without an invoice rather than a paid
/// invoice without an order. If the gateway refuses or cannot be reached the
/// order is marked failed and `GatewayUnavailable` is returned. An invoice
/// that cannot be stored on the order also fails the order.
pub async fn issue_gateway_invoice(
    state: &AppState,
    new_order: NewOrder,
    description: &str,
) -> Result<Order, AppError> {
    if new_order.amount <= BigDecimal::from(0) {
        return Err(AppError::InvalidAmount(format!(
            "order amount must be positive, got {}",
            new_order.amount
        )));
    }

    let order = insert_order(&state.pool, &new_order, OrderStatus::Pending, None, None).await?;

    let request = InvoiceRequest {
        sender_invoice_no: order.id.to_string(),
        receiver_code: order
            .buyer_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "guest".to_string()),
        description: description.to_string(),
        amount: order.amount.clone(),
        callback_url: state.config.webhook_url(),
    };

    let invoice = match state.gateway.create_invoice(&request).await {
        Ok(invoice) => invoice,
        Err(e) => {
            tracing::warn!(order_id = %order.id, error = %e, "Invoice creation failed");
            mark_failed(state, order.id).await?;
            return Err(e.into());
        }
    };

    let query = format!(
        "UPDATE orders SET invoice_id = $2, qr_text = $3, qr_image = $4, updated_at = NOW() \
         WHERE id = $1 RETURNING {}",
        ORDER_COLUMNS
    );
    let stored = sqlx::query_as(&query)
        .bind(order.id)
        .bind(&invoice.invoice_id)
        .bind(&invoice.qr_text)
        .bind(&invoice.qr_image)
        .fetch_one(&state.pool)
        .await;
    let order: Order = match stored {
        Ok(order) => order,
        Err(e) => {
            tracing::error!(
                order_id = %order.id,
                invoice_id = %invoice.invoice_id,
                error = %e,
                "Storing the gateway invoice failed"
            );
            if let Err(mark_err) = mark_failed(state, order.id).await {
                tracing::error!(order_id = %order.id, error = %mark_err, "Could not fail order");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        order_id = %order.id,
        invoice_id = %invoice.invoice_id,
        kind = ?order.kind,
        amount = %order.amount,
        "Invoice issued"
    );

    Ok(order)
}

/// Pays for a product or membership from the buyer's balance.
///
/// Everything happens in one transaction: the buyer (and for products the
/// creator) are locked in id order, the balance is checked and debited, and
/// the order is written already completed with its settlement effects.
pub async fn pay_with_wallet(
    state: &AppState,
    buyer_id: Uuid,
    purchase: WalletPurchase,
) -> Result<(Order, SettlementEffects), AppError> {
    let mut tx = state.pool.begin().await?;

    let (new_order, creator_id) = match purchase {
        WalletPurchase::Product(product_id) => {
            let product = settlement::load_product(&mut *tx, product_id).await?;
            (
                NewOrder::product(
                    Some(buyer_id),
                    product.id,
                    product.price,
                    PaymentMethod::Wallet,
                ),
                Some(product.creator_id),
            )
        }
        WalletPurchase::Membership(membership_id) => {
            let membership = subscription::load_membership(&mut *tx, membership_id).await?;
            (
                NewOrder::membership(
                    buyer_id,
                    membership.id,
                    membership.price,
                    PaymentMethod::Wallet,
                ),
                None,
            )
        }
    };

    if new_order.amount <= BigDecimal::from(0) {
        return Err(AppError::InvalidAmount(format!(
            "order amount must be positive, got {}",
            new_order.amount
        )));
    }

    let mut to_lock = vec![buyer_id];
    to_lock.extend(creator_id);
    let locked = ledger::lock_accounts(&mut tx, &to_lock).await?;

    let buyer = locked
        .iter()
        .find(|account| account.id == buyer_id)
        .ok_or_else(|| AppError::NotFound(format!("Account not found: {}", buyer_id)))?;
    if !buyer.has_sufficient_balance(&new_order.amount) {
        return Err(AppError::InsufficientBalance {
            available: buyer.balance.clone(),
            requested: new_order.amount.clone(),
        });
    }

    let reference = format!("wallet-{}", Uuid::new_v4());
    let order = insert_order(
        &mut *tx,
        &new_order,
        OrderStatus::Completed,
        Some(&reference),
        Some(Utc::now()),
    )
    .await?;

    ledger::apply_entry(
        &mut tx,
        &NewLedgerEntry::wallet_debit(buyer_id, order.id, order.amount.clone()),
    )
    .await?;
    let effects = settlement::apply_settlement_effects(&mut tx, &state.config, &order).await?;

    tx.commit().await?;

    tracing::info!(
        order_id = %order.id,
        buyer_id = %buyer_id,
        kind = ?order.kind,
        amount = %order.amount,
        "Wallet payment settled"
    );

    Ok((order, effects))
}

/// Cancels an unpaid gateway invoice.
///
/// The gateway is asked first: an invoice that was paid in the meantime is
/// settled instead and the cancellation refused.
pub async fn cancel_invoice(
    state: &AppState,
    invoice_id: &str,
    kinds: &[OrderKind],
) -> Result<Order, AppError> {
    let order = settlement::find_order_by_invoice(&state.pool, invoice_id)
        .await?
        .filter(|order| kinds.contains(&order.kind))
        .ok_or_else(|| AppError::NotFound(format!("Invoice not found: {}", invoice_id)))?;

    if order.status.is_terminal() {
        return Err(AppError::InvalidStateTransition {
            from: order.status.to_string(),
            to: OrderStatus::Cancelled.to_string(),
        });
    }

    match state.gateway.check_invoice(invoice_id).await? {
        GatewayPaymentStatus::Paid { .. } => {
            let outcome =
                settlement::confirm_invoice(state, invoice_id, ConfirmationSource::Poll, kinds)
                    .await?;
            let status = match &outcome {
                ConfirmationOutcome::StillPending(_) => OrderStatus::Pending,
                other => other.order().status,
            };
            return Err(AppError::InvalidStateTransition {
                from: status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }
        GatewayPaymentStatus::Pending | GatewayPaymentStatus::Failed { .. } => {}
    }

    let mut tx = state.pool.begin().await?;
    let locked = settlement::lock_order_by_invoice(&mut tx, invoice_id).await?;
    if !locked.status.can_transition_to(OrderStatus::Cancelled) {
        return Err(AppError::InvalidStateTransition {
            from: locked.status.to_string(),
            to: OrderStatus::Cancelled.to_string(),
        });
    }

    let query = format!(
        "UPDATE orders SET status = 'cancelled', updated_at = NOW() WHERE id = $1 RETURNING {}",
        ORDER_COLUMNS
    );
    let order: Order = sqlx::query_as(&query)
        .bind(locked.id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    if let Err(e) = state.gateway.cancel_invoice(invoice_id).await {
        tracing::warn!(invoice_id = %invoice_id, error = %e, "Gateway cancel failed");
    }

    tracing::info!(order_id = %order.id, invoice_id = %invoice_id, "Invoice cancelled");
    Ok(order)
}
