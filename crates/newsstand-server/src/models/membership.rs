//! Membership plans, as far as settlement needs them.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// One line of a plan's feature list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipAdvantage {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_included")]
    pub included: bool,
}

fn default_included() -> bool {
    true
}

/// A creator membership plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: Uuid,
    pub name: String,
    /// Share of each sale kept by the platform, 0 to 100.
    pub commission_percent: BigDecimal,
    /// Products a creator may publish per subscription period.
    pub post_quota: i32,
    /// Price of one period.
    pub price: BigDecimal,
    pub period_days: i32,
    pub advantages: Json<Vec<MembershipAdvantage>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    /// Length of one subscription period.
    pub fn period(&self) -> Duration {
        Duration::days(i64::from(self.period_days))
    }

    /// Posts left in the current period, never negative.
    pub fn remaining_posts(&self, used: i64) -> i64 {
        (i64::from(self.post_quota) - used).max(0)
    }
}
