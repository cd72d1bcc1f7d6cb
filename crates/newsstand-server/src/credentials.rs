//! Single-use download credentials for completed product purchases.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, CredentialError};
use crate::models::{DownloadCredential, Order};

/// Random bytes per token before hex encoding.
const TOKEN_BYTES: usize = 32;

const CREDENTIAL_COLUMNS: &str =
    "id, token, order_id, product_id, buyer_id, expires_at, used_at, created_at";

/// A freshly issued (or re-read) download link.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredential {
    #[serde(skip)]
    pub token: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Generates a 64 character hex token from the OS-seeded RNG.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Whether `token` could have come from [`generate_token`].
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Issues the download credential for a completed product order.
///
/// Runs inside the completion transaction, so a rollback discards the
/// credential together with the order transition.
pub async fn issue(
    tx: &mut Transaction<'_, Postgres>,
    config: &Config,
    order: &Order,
    product_id: Uuid,
) -> Result<IssuedCredential, AppError> {
    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(config.download_ttl_hours);

    sqlx::query(
        r#"
        INSERT INTO download_credentials (token, order_id, product_id, buyer_id, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&token)
    .bind(order.id)
    .bind(product_id)
    .bind(order.buyer_id)
    .bind(expires_at)
    .execute(&mut **tx)
    .await?;

    tracing::info!(
        order_id = %order.id,
        product_id = %product_id,
        expires_at = %expires_at,
        "Download credential issued"
    );

    Ok(IssuedCredential {
        url: config.download_url(&token),
        token,
        expires_at,
    })
}

/// The still redeemable credential of an order, if any.
pub async fn find_active_for_order(
    pool: &PgPool,
    config: &Config,
    order_id: Uuid,
) -> Result<Option<IssuedCredential>, AppError> {
    let query = format!(
        "SELECT {} FROM download_credentials \
         WHERE order_id = $1 AND used_at IS NULL AND expires_at > NOW()",
        CREDENTIAL_COLUMNS
    );
    let credential: Option<DownloadCredential> = sqlx::query_as(&query)
        .bind(order_id)
        .fetch_optional(pool)
        .await?;

    Ok(credential.map(|c| IssuedCredential {
        url: config.download_url(&c.token),
        token: c.token,
        expires_at: c.expires_at,
    }))
}

/// Looks a token up without consuming it.
pub async fn peek(pool: &PgPool, token: &str) -> Result<DownloadCredential, AppError> {
    if !is_well_formed(token) {
        return Err(CredentialError::Unknown.into());
    }

    let query = format!(
        "SELECT {} FROM download_credentials WHERE token = $1",
        CREDENTIAL_COLUMNS
    );
    let credential: Option<DownloadCredential> =
        sqlx::query_as(&query).bind(token).fetch_optional(pool).await?;

    let credential = credential.ok_or(CredentialError::Unknown)?;
    if let Some(reason) = credential.rejection_at(Utc::now()) {
        return Err(reason.into());
    }
    Ok(credential)
}

/// Consumes a token. At most one caller ever gets `Ok` for a given token.
pub async fn redeem(pool: &PgPool, token: &str) -> Result<DownloadCredential, AppError> {
    if !is_well_formed(token) {
        return Err(CredentialError::Unknown.into());
    }

    let query = format!(
        "UPDATE download_credentials SET used_at = NOW() \
         WHERE token = $1 AND used_at IS NULL AND expires_at > NOW() \
         RETURNING {}",
        CREDENTIAL_COLUMNS
    );
    let redeemed: Option<DownloadCredential> =
        sqlx::query_as(&query).bind(token).fetch_optional(pool).await?;

    if let Some(credential) = redeemed {
        tracing::info!(
            order_id = %credential.order_id,
            product_id = %credential.product_id,
            "Download credential redeemed"
        );
        return Ok(credential);
    }

    // Nothing updated: work out why for the caller.
    let query = format!(
        "SELECT {} FROM download_credentials WHERE token = $1",
        CREDENTIAL_COLUMNS
    );
    let existing: Option<DownloadCredential> =
        sqlx::query_as(&query).bind(token).fetch_optional(pool).await?;

    let reason = match existing {
        None => CredentialError::Unknown,
        Some(credential) => credential
            .rejection_at(Utc::now())
            .unwrap_or(CredentialError::Expired),
    };
    tracing::debug!(reason = %reason, "Download credential refused");
    Err(reason.into())
}
