//! Product model (read-only from settlement's point of view).

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A digital product offered by a creator.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    /// Creator credited when the product sells.
    pub creator_id: Uuid,
    pub title: String,
    pub price: BigDecimal,
    /// Location of the file inside the storage directory.
    pub file_key: String,
    pub created_at: DateTime<Utc>,
}
