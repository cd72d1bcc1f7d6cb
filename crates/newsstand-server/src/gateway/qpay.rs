//! HTTP client for the QPay v2 merchant API.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{GatewayError, GatewayInvoice, GatewayPaymentStatus, InvoiceRequest, PaymentGateway};
use crate::config::GatewayConfig;

/// Access tokens are refreshed well before the gateway's one hour expiry.
const TOKEN_REFRESH_AFTER: Duration = Duration::from_secs(50 * 60);

struct AccessToken {
    value: String,
    obtained_at: Instant,
}

/// QPay merchant API client.
pub struct QpayGateway {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    invoice_code: String,
    token: Mutex<Option<AccessToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct CreateInvoiceBody<'a> {
    invoice_code: &'a str,
    sender_invoice_no: &'a str,
    invoice_receiver_code: &'a str,
    invoice_description: &'a str,
    amount: f64,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateInvoiceResponse {
    invoice_id: String,
    qr_text: String,
    qr_image: String,
}

#[derive(Debug, Serialize)]
struct PaymentCheckBody<'a> {
    object_type: &'static str,
    object_id: &'a str,
    offset: PageOffset,
}

#[derive(Debug, Serialize)]
struct PageOffset {
    page_number: u32,
    page_limit: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PaymentCheckResponse {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    rows: Vec<PaymentRow>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PaymentRow {
    payment_id: String,
    payment_status: String,
    #[serde(default)]
    payment_amount: serde_json::Value,
}

impl QpayGateway {
    /// Builds a client from gateway configuration.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            invoice_code: config.invoice_code.clone(),
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Returns a cached access token, fetching a new one when stale.
    async fn access_token(&self, force_refresh: bool) -> Result<String, GatewayError> {
        let mut guard = self.token.lock().await;

        if !force_refresh {
            if let Some(token) = guard.as_ref() {
                if token.obtained_at.elapsed() < TOKEN_REFRESH_AFTER {
                    return Ok(token.value.clone());
                }
            }
        }

        let response = self
            .http
            .post(self.url("/v2/auth/token"))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: TokenResponse = response.json().await?;

        *guard = Some(AccessToken {
            value: body.access_token.clone(),
            obtained_at: Instant::now(),
        });
        tracing::debug!("Obtained new gateway access token");

        Ok(body.access_token)
    }

    /// Sends an authorized request, refreshing the token once on 401.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, GatewayError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.access_token(false).await?;
        let response = build(&self.http).bearer_auth(&token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let token = self.access_token(true).await?;
            let retry = build(&self.http).bearer_auth(&token).send().await?;
            return ensure_success(retry).await;
        }

        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(GatewayError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Interprets a payment check response.
pub(crate) fn interpret_payment_check(body: PaymentCheckResponse) -> GatewayPaymentStatus {
    if body.count == 0 || body.rows.is_empty() {
        return GatewayPaymentStatus::Pending;
    }

    let paid: Vec<&PaymentRow> = body
        .rows
        .iter()
        .filter(|row| row.payment_status.eq_ignore_ascii_case("PAID"))
        .collect();

    if let Some(first) = paid.first() {
        let paid_amount = paid
            .iter()
            .filter_map(|row| decimal_from_json(&row.payment_amount))
            .fold(BigDecimal::from(0), |acc, amount| acc + amount);
        return GatewayPaymentStatus::Paid {
            transaction_id: first.payment_id.clone(),
            paid_amount,
        };
    }

    if body
        .rows
        .iter()
        .all(|row| row.payment_status.eq_ignore_ascii_case("FAILED"))
    {
        return GatewayPaymentStatus::Failed {
            reason: "all payment attempts failed".to_string(),
        };
    }

    GatewayPaymentStatus::Pending
}

/// The gateway reports amounts either as JSON numbers or as strings.
fn decimal_from_json(value: &serde_json::Value) -> Option<BigDecimal> {
    match value {
        serde_json::Value::String(s) => BigDecimal::from_str(s).ok(),
        serde_json::Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for QpayGateway {
    async fn create_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> Result<GatewayInvoice, GatewayError> {
        let amount = request.amount.to_f64().ok_or_else(|| {
            GatewayError::InvalidResponse(format!("amount {} not representable", request.amount))
        })?;
        let body = CreateInvoiceBody {
            invoice_code: &self.invoice_code,
            sender_invoice_no: &request.sender_invoice_no,
            invoice_receiver_code: &request.receiver_code,
            invoice_description: &request.description,
            amount,
            callback_url: &request.callback_url,
        };
        let url = self.url("/v2/invoice");

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;
        let invoice: CreateInvoiceResponse = response.json().await?;

        Ok(GatewayInvoice {
            invoice_id: invoice.invoice_id,
            qr_text: invoice.qr_text,
            qr_image: invoice.qr_image,
        })
    }

    async fn check_invoice(&self, invoice_id: &str) -> Result<GatewayPaymentStatus, GatewayError> {
        let body = PaymentCheckBody {
            object_type: "INVOICE",
            object_id: invoice_id,
            offset: PageOffset {
                page_number: 1,
                page_limit: 100,
            },
        };
        let url = self.url("/v2/payment/check");

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;
        let check: PaymentCheckResponse = response.json().await?;

        Ok(interpret_payment_check(check))
    }

    async fn cancel_invoice(&self, invoice_id: &str) -> Result<(), GatewayError> {
        let url = self.url(&format!("/v2/invoice/{}", invoice_id));
        self.send_authorized(|http| http.delete(&url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(value: serde_json::Value) -> GatewayPaymentStatus {
        interpret_payment_check(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn test_no_rows_is_pending() {
        assert_eq!(
            check(json!({"count": 0, "rows": []})),
            GatewayPaymentStatus::Pending
        );
    }

    #[test]
    fn test_paid_row_sums_amounts() {
        let status = check(json!({
            "count": 2,
            "paid_amount": 10000,
            "rows": [
                {"payment_id": "pay_1", "payment_status": "PAID", "payment_amount": "6000.00"},
                {"payment_id": "pay_2", "payment_status": "PAID", "payment_amount": 4000}
            ]
        }));

        assert_eq!(
            status,
            GatewayPaymentStatus::Paid {
                transaction_id: "pay_1".to_string(),
                paid_amount: BigDecimal::from_str("10000.00").unwrap(),
            }
        );
    }

    #[test]
    fn test_all_failed_rows_is_failed() {
        let status = check(json!({
            "count": 1,
            "rows": [{"payment_id": "pay_1", "payment_status": "FAILED"}]
        }));
        assert!(matches!(status, GatewayPaymentStatus::Failed { .. }));
    }

    #[test]
    fn test_mixed_unpaid_rows_stay_pending() {
        let status = check(json!({
            "count": 2,
            "rows": [
                {"payment_id": "pay_1", "payment_status": "FAILED"},
                {"payment_id": "pay_2", "payment_status": "NEW"}
            ]
        }));
        assert_eq!(status, GatewayPaymentStatus::Pending);
    }

    #[test]
    fn test_create_invoice_body_shape() {
        let body = CreateInvoiceBody {
            invoice_code: "NEWSSTAND_INVOICE",
            sender_invoice_no: "order-1",
            invoice_receiver_code: "terminal",
            invoice_description: "Article purchase",
            amount: 10000.0,
            callback_url: "https://newsstand.example/api/v1/webhook",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["invoice_code"], "NEWSSTAND_INVOICE");
        assert_eq!(value["amount"], 10000.0);
        assert_eq!(value["callback_url"], "https://newsstand.example/api/v1/webhook");
    }
}
