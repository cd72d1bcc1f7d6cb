//! Order model: one payment intent.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// What an order pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// Purchase of a creator's digital product.
    Product,
    /// Top-up of the buyer's own balance.
    Recharge,
    /// Membership purchase or renewal.
    Membership,
}

/// How an order is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// External QR payment gateway.
    Gateway,
    /// Internal account balance.
    Wallet,
    /// Manual bank transfer.
    Bank,
    Other,
}

/// Possible states of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Awaiting payment confirmation.
    Pending,
    /// Paid and settled.
    Completed,
    /// Payment failed or the invoice expired.
    Failed,
    /// Cancelled before payment.
    Cancelled,
}

impl OrderStatus {
    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        self != OrderStatus::Pending
    }

    /// Orders only ever leave `pending`, and only once.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self == OrderStatus::Pending && next != OrderStatus::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a payment intent.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    /// Unique identifier for this order.
    pub id: Uuid,
    /// Paying account; none for guest purchases.
    pub buyer_id: Option<Uuid>,
    pub kind: OrderKind,
    /// Purchased product (product orders only).
    pub product_id: Option<Uuid>,
    /// Purchased membership (membership orders only).
    pub membership_id: Option<Uuid>,
    /// Amount captured at issuance.
    pub amount: BigDecimal,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    /// Gateway payment reference, set on completion.
    pub transaction_id: Option<String>,
    /// Invoice reference, unique across all orders.
    pub invoice_id: Option<String>,
    pub qr_text: Option<String>,
    pub qr_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the order reached a terminal state.
    pub settled_at: Option<DateTime<Utc>>,
}

/// Column list matching [`Order`], shared by queries.
pub const ORDER_COLUMNS: &str = "id, buyer_id, kind, product_id, membership_id, amount, \
     payment_method, status, transaction_id, invoice_id, qr_text, qr_image, \
     created_at, updated_at, settled_at";

/// Data required to create a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub buyer_id: Option<Uuid>,
    pub kind: OrderKind,
    pub product_id: Option<Uuid>,
    pub membership_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub payment_method: PaymentMethod,
}

impl NewOrder {
    /// Order for a creator's product.
    pub fn product(
        buyer_id: Option<Uuid>,
        product_id: Uuid,
        amount: BigDecimal,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            buyer_id,
            kind: OrderKind::Product,
            product_id: Some(product_id),
            membership_id: None,
            amount,
            payment_method,
        }
    }

    /// Order topping up the buyer's balance.
    pub fn recharge(buyer_id: Uuid, amount: BigDecimal) -> Self {
        Self {
            buyer_id: Some(buyer_id),
            kind: OrderKind::Recharge,
            product_id: None,
            membership_id: None,
            amount,
            payment_method: PaymentMethod::Gateway,
        }
    }

    /// Order for a membership plan.
    pub fn membership(
        creator_id: Uuid,
        membership_id: Uuid,
        amount: BigDecimal,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            buyer_id: Some(creator_id),
            kind: OrderKind::Membership,
            product_id: None,
            membership_id: Some(membership_id),
            amount,
            payment_method,
        }
    }
}

impl Order {
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status == OrderStatus::Completed
    }
}
