//! In-memory payment gateway for local runs and tests.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{GatewayError, GatewayInvoice, GatewayPaymentStatus, InvoiceRequest, PaymentGateway};

#[derive(Debug, Clone)]
struct SandboxInvoice {
    sender_invoice_no: String,
    amount: BigDecimal,
    status: GatewayPaymentStatus,
}

/// Gateway that keeps invoices in memory and lets callers decide their fate.
#[derive(Debug, Default)]
pub struct SandboxGateway {
    invoices: Mutex<HashMap<String, SandboxInvoice>>,
    offline: AtomicBool,
    check_calls: AtomicU64,
    forced_invoice_id: Mutex<Option<String>>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a gateway outage: every call fails until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes every following invoice carry this id instead of a fresh one,
    /// the way a misbehaving gateway might repeat a reference.
    pub fn force_invoice_id(&self, invoice_id: Option<String>) {
        *self
            .forced_invoice_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = invoice_id;
    }

    /// Number of status checks served so far.
    pub fn check_calls(&self) -> u64 {
        self.check_calls.load(Ordering::SeqCst)
    }

    /// Records a full payment of the invoice. Returns false for unknown invoices.
    pub fn mark_paid(&self, invoice_id: &str) -> bool {
        let mut invoices = self.lock();
        match invoices.get_mut(invoice_id) {
            Some(invoice) => {
                invoice.status = GatewayPaymentStatus::Paid {
                    transaction_id: format!("sandbox-tx-{}", Uuid::new_v4()),
                    paid_amount: invoice.amount.clone(),
                };
                true
            }
            None => false,
        }
    }

    /// Records a payment of an arbitrary amount.
    pub fn mark_paid_amount(&self, invoice_id: &str, paid_amount: BigDecimal) -> bool {
        let mut invoices = self.lock();
        match invoices.get_mut(invoice_id) {
            Some(invoice) => {
                invoice.status = GatewayPaymentStatus::Paid {
                    transaction_id: format!("sandbox-tx-{}", Uuid::new_v4()),
                    paid_amount,
                };
                true
            }
            None => false,
        }
    }

    /// Marks the invoice as failed/expired.
    pub fn mark_failed(&self, invoice_id: &str) -> bool {
        let mut invoices = self.lock();
        match invoices.get_mut(invoice_id) {
            Some(invoice) => {
                invoice.status = GatewayPaymentStatus::Failed {
                    reason: "expired".to_string(),
                };
                true
            }
            None => false,
        }
    }

    /// Looks up the gateway invoice id issued for one of our order references.
    pub fn invoice_for(&self, sender_invoice_no: &str) -> Option<String> {
        self.lock()
            .iter()
            .find(|(_, invoice)| invoice.sender_invoice_no == sender_invoice_no)
            .map(|(id, _)| id.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SandboxInvoice>> {
        self.invoices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_online(&self) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> Result<GatewayInvoice, GatewayError> {
        self.ensure_online()?;

        let forced = self
            .forced_invoice_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let invoice_id = forced.unwrap_or_else(|| format!("sandbox-inv-{}", Uuid::new_v4()));
        self.lock().insert(
            invoice_id.clone(),
            SandboxInvoice {
                sender_invoice_no: request.sender_invoice_no.clone(),
                amount: request.amount.clone(),
                status: GatewayPaymentStatus::Pending,
            },
        );

        Ok(GatewayInvoice {
            qr_text: format!("sandbox://pay/{}?amount={}", invoice_id, request.amount),
            qr_image: String::new(),
            invoice_id,
        })
    }

    async fn check_invoice(&self, invoice_id: &str) -> Result<GatewayPaymentStatus, GatewayError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        self.lock()
            .get(invoice_id)
            .map(|invoice| invoice.status.clone())
            .ok_or_else(|| GatewayError::Rejected {
                status: 404,
                message: format!("unknown invoice {}", invoice_id),
            })
    }

    async fn cancel_invoice(&self, invoice_id: &str) -> Result<(), GatewayError> {
        self.ensure_online()?;

        let mut invoices = self.lock();
        match invoices.get_mut(invoice_id) {
            Some(invoice) => {
                invoice.status = GatewayPaymentStatus::Failed {
                    reason: "cancelled".to_string(),
                };
                Ok(())
            }
            None => Err(GatewayError::Rejected {
                status: 404,
                message: format!("unknown invoice {}", invoice_id),
            }),
        }
    }
}
