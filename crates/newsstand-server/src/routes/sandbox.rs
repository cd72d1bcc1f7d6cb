//! Controls for the in-memory gateway. Mounted only in sandbox mode.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::AppError;
use crate::gateway::SandboxGateway;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxResponse {
    pub invoice_id: String,
    pub payment_status: &'static str,
}

/// Creates the sandbox router.
pub fn router(sandbox: Arc<SandboxGateway>) -> Router {
    Router::new()
        .route("/invoices/{invoice_id}/pay", post(mark_paid))
        .route("/invoices/{invoice_id}/fail", post(mark_failed))
        .with_state(sandbox)
}

/// POST /api/v1/sandbox/invoices/{invoiceId}/pay
async fn mark_paid(
    State(sandbox): State<Arc<SandboxGateway>>,
    Path(invoice_id): Path<String>,
) -> Result<Json<SandboxResponse>, AppError> {
    if !sandbox.mark_paid(&invoice_id) {
        return Err(AppError::NotFound(format!("Invoice not found: {}", invoice_id)));
    }
    Ok(Json(SandboxResponse {
        invoice_id,
        payment_status: "PAID",
    }))
}

/// POST /api/v1/sandbox/invoices/{invoiceId}/fail
async fn mark_failed(
    State(sandbox): State<Arc<SandboxGateway>>,
    Path(invoice_id): Path<String>,
) -> Result<Json<SandboxResponse>, AppError> {
    if !sandbox.mark_failed(&invoice_id) {
        return Err(AppError::NotFound(format!("Invoice not found: {}", invoice_id)));
    }
    Ok(Json(SandboxResponse {
        invoice_id,
        payment_status: "FAILED",
    }))
}
