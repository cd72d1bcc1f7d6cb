//! Download credential model: single-use token for a purchased file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::CredentialError;

/// A one-time download grant bound to an order, product and buyer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DownloadCredential {
    pub id: Uuid,
    /// Bearer token embedded in the download URL.
    pub token: String,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub buyer_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    /// When the token was redeemed (null if not yet used).
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DownloadCredential {
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at <= at
    }

    /// Why the credential cannot be redeemed at `at`, if it cannot.
    /// A used token reports `Used` even after it expires.
    pub fn rejection_at(&self, at: DateTime<Utc>) -> Option<CredentialError> {
        if self.is_used() {
            Some(CredentialError::Used)
        } else if self.is_expired_at(at) {
            Some(CredentialError::Expired)
        } else {
            None
        }
    }
}
