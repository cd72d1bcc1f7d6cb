//! QR payment gateway integration.
//!
//! The settlement engine only depends on the [`PaymentGateway`] trait. Two
//! implementations ship with the server: [`QpayGateway`], which talks to the
//! real QR gateway over HTTP, and [`SandboxGateway`], an in-memory stand-in
//! used for local runs and tests.

pub mod qpay;
pub mod sandbox;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;

pub use qpay::QpayGateway;
pub use sandbox::SandboxGateway;

/// Data sent to the gateway when requesting a payable invoice.
#[derive(Debug, Clone)]
pub struct InvoiceRequest {
    /// Our own reference for the invoice (the order id).
    pub sender_invoice_no: String,
    /// Identifies the payer on the gateway side.
    pub receiver_code: String,
    /// Human readable description shown in the banking app.
    pub description: String,
    pub amount: BigDecimal,
    /// Where the gateway pushes payment notifications.
    pub callback_url: String,
}

/// A payable invoice as issued by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInvoice {
    /// Gateway-side invoice reference.
    pub invoice_id: String,
    /// Text payload encoded in the QR code.
    pub qr_text: String,
    /// Base64 encoded PNG of the QR code.
    pub qr_image: String,
}

/// Payment state of an invoice as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
    /// The invoice has been paid.
    Paid {
        transaction_id: String,
        paid_amount: BigDecimal,
    },
    /// No payment recorded yet.
    Pending,
    /// The payment failed or the invoice expired.
    Failed { reason: String },
}

/// Errors talking to the gateway. All of them are transient from the
/// settlement engine's point of view.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    #[error("gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Unreachable(err.to_string())
        }
    }
}

/// External QR payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Requests a payable invoice with a scannable QR payload.
    async fn create_invoice(&self, request: &InvoiceRequest)
        -> Result<GatewayInvoice, GatewayError>;

    /// Fetches the current payment state of an invoice.
    async fn check_invoice(&self, invoice_id: &str) -> Result<GatewayPaymentStatus, GatewayError>;

    /// Voids an unpaid invoice.
    async fn cancel_invoice(&self, invoice_id: &str) -> Result<(), GatewayError>;
}
