//! Membership subscription windows.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger;
use crate::models::{Account, Membership};

const MEMBERSHIP_COLUMNS: &str = "id, name, commission_percent, post_quota, price, \
     period_days, advantages, created_at, updated_at";

/// Subscription state of an account after a renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionWindow {
    pub membership_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Computes the window after buying one period of `target`.
///
/// Renewing the current plan extends from the later of now and the current
/// end, so paid time is never lost. Switching plans (or subscribing for the
/// first time) starts a fresh window at `now`.
pub fn next_window(
    now: DateTime<Utc>,
    current: Option<SubscriptionWindow>,
    target: Uuid,
    period: Duration,
) -> SubscriptionWindow {
    match current {
        Some(current) if current.membership_id == target => {
            let lapsed = current.end <= now;
            let base = if lapsed { now } else { current.end };
            SubscriptionWindow {
                membership_id: target,
                start: if lapsed { now } else { current.start },
                end: base + period,
            }
        }
        _ => SubscriptionWindow {
            membership_id: target,
            start: now,
            end: now + period,
        },
    }
}

/// Current window of an account, if it has ever subscribed.
pub fn current_window(account: &Account) -> Option<SubscriptionWindow> {
    match (
        account.membership_id,
        account.subscription_start,
        account.subscription_end,
    ) {
        (Some(membership_id), Some(start), Some(end)) => Some(SubscriptionWindow {
            membership_id,
            start,
            end,
        }),
        _ => None,
    }
}

pub async fn load_membership<'e, E>(executor: E, membership_id: Uuid) -> Result<Membership, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = format!("SELECT {} FROM memberships WHERE id = $1", MEMBERSHIP_COLUMNS);
    sqlx::query_as(&query)
        .bind(membership_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Membership not found: {}", membership_id)))
}

/// Extends or switches an account's subscription by one period of
/// `membership_id`. Locks the account row for the rest of `tx`.
pub async fn renew(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    membership_id: Uuid,
) -> Result<SubscriptionWindow, AppError> {
    let membership = load_membership(&mut **tx, membership_id).await?;
    let account = ledger::lock_account(tx, account_id).await?;

    let window = next_window(
        Utc::now(),
        current_window(&account),
        membership.id,
        membership.period(),
    );

    sqlx::query(
        r#"
        UPDATE accounts
        SET membership_id = $2, subscription_start = $3, subscription_end = $4, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(account_id)
    .bind(window.membership_id)
    .bind(window.start)
    .bind(window.end)
    .execute(&mut **tx)
    .await?;

    tracing::info!(
        account_id = %account_id,
        membership_id = %membership_id,
        start = %window.start,
        end = %window.end,
        "Subscription renewed"
    );

    Ok(window)
}

/// Platform commission applied to a creator's sales.
///
/// Falls back to `default_percent` when the creator has no plan or the
/// subscription has lapsed.
pub async fn commission_percent<'e, E>(
    executor: E,
    account: &Account,
    default_percent: &BigDecimal,
) -> Result<BigDecimal, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    match account.membership_id {
        Some(membership_id) if account.subscription_active_at(Utc::now()) => {
            Ok(load_membership(executor, membership_id).await?.commission_percent)
        }
        _ => Ok(default_percent.clone()),
    }
}

/// Read model for `GET /membership/status/{creatorId}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub creator_id: Uuid,
    pub membership: Option<Membership>,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub active: bool,
    pub post_quota: i64,
    pub posts_used: i64,
    pub posts_remaining: i64,
}

pub async fn status(pool: &PgPool, creator_id: Uuid) -> Result<SubscriptionStatus, AppError> {
    let account = ledger::load_account(pool, creator_id).await?;
    let now = Utc::now();

    let membership = match account.membership_id {
        Some(id) => Some(load_membership(pool, id).await?),
        None => None,
    };

    let active = account.subscription_active_at(now);
    let posts_used: i64 = match (active, account.subscription_start, account.subscription_end) {
        (true, Some(start), Some(end)) => sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM products
            WHERE creator_id = $1 AND created_at >= $2 AND created_at < $3
            "#,
        )
        .bind(creator_id)
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await?,
        _ => 0,
    };

    let (post_quota, posts_remaining) = match (&membership, active) {
        (Some(m), true) => (i64::from(m.post_quota), m.remaining_posts(posts_used)),
        _ => (0, 0),
    };

    Ok(SubscriptionStatus {
        creator_id,
        subscription_start: account.subscription_start,
        subscription_end: account.subscription_end,
        membership,
        active,
        post_quota,
        posts_used,
        posts_remaining,
    })
}
