//! Earnings ledger: commission split and locked balance movements.
//!
//! Every function taking a transaction expects the caller to commit it; a
//! dropped transaction rolls back every balance change made through it.

use bigdecimal::{BigDecimal, RoundingMode};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Account, LedgerEntry, NewLedgerEntry};

/// Decimal places of the currency's smallest unit.
pub const CURRENCY_SCALE: i64 = 2;

const ACCOUNT_COLUMNS: &str = "id, account_number, display_name, is_creator, balance, \
     membership_id, subscription_start, subscription_end, bank_name, bank_account, \
     account_holder, created_at, updated_at";

/// Rounds to the smallest currency unit, halves away from zero.
pub fn round_currency(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(CURRENCY_SCALE, RoundingMode::HalfUp)
}

/// Creator's share of a sale when the platform keeps `commission_percent`.
///
/// Computes `amount * (100 - commission_percent) / 100`, rounded once.
pub fn creator_share(amount: &BigDecimal, commission_percent: &BigDecimal) -> BigDecimal {
    let hundred = BigDecimal::from(100);
    let kept_percent = &hundred - commission_percent;
    round_currency(&(amount * kept_percent / hundred))
}

/// Largest amount a `NUMERIC(14, 2)` column holds.
const MAX_AMOUNT: &str = "999999999999.99";

/// Exponent bounds checked before any rescaling: below `-11` the value is at
/// least `1e12` whatever its digits, above `18` the input is refused as
/// having too many decimal places.
const MIN_INPUT_EXPONENT: i64 = -11;
const MAX_INPUT_EXPONENT: i64 = 18;

/// Validates a user supplied money amount: positive, at most two decimals,
/// within the storable range.
pub fn parse_amount(raw: &str) -> Result<BigDecimal, AppError> {
    let amount: BigDecimal = raw
        .trim()
        .parse()
        .map_err(|e| AppError::InvalidAmount(format!("'{}' is not a number: {}", raw, e)))?;

    // Scientific notation such as `1e5000000` parses cheaply but expands to
    // millions of digits once rescaled.
    let (_, exponent) = amount.as_bigint_and_exponent();
    if exponent < MIN_INPUT_EXPONENT {
        return Err(AppError::InvalidAmount(format!(
            "amount may not exceed {}",
            MAX_AMOUNT
        )));
    }
    if exponent > MAX_INPUT_EXPONENT {
        return Err(AppError::InvalidAmount(format!(
            "amount may have at most {} decimal places",
            CURRENCY_SCALE
        )));
    }

    if amount <= BigDecimal::from(0) {
        return Err(AppError::InvalidAmount("amount must be positive".to_string()));
    }
    let max_amount: BigDecimal = MAX_AMOUNT
        .parse()
        .map_err(|e| AppError::Internal(format!("invalid amount ceiling: {}", e)))?;
    if amount > max_amount {
        return Err(AppError::InvalidAmount(format!(
            "amount may not exceed {}",
            MAX_AMOUNT
        )));
    }
    if round_currency(&amount) != amount {
        return Err(AppError::InvalidAmount(format!(
            "amount may have at most {} decimal places",
            CURRENCY_SCALE
        )));
    }

    Ok(round_currency(&amount))
}

/// Loads an account and holds its row lock until the transaction ends.
pub async fn lock_account(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
) -> Result<Account, AppError> {
    let query = format!("SELECT {} FROM accounts WHERE id = $1 FOR UPDATE", ACCOUNT_COLUMNS);
    sqlx::query_as(&query)
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Account not found: {}", account_id)))
}

/// Locks several accounts in ascending id order so concurrent callers
/// touching the same rows cannot deadlock.
pub async fn lock_accounts(
    tx: &mut Transaction<'_, Postgres>,
    account_ids: &[Uuid],
) -> Result<Vec<Account>, AppError> {
    let mut ids = account_ids.to_vec();
    ids.sort();
    ids.dedup();

    let mut accounts = Vec::with_capacity(ids.len());
    for id in ids {
        accounts.push(lock_account(tx, id).await?);
    }
    Ok(accounts)
}

/// Reads an account without locking.
pub async fn load_account<'e, E>(executor: E, account_id: Uuid) -> Result<Account, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
    sqlx::query_as(&query)
        .bind(account_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Account not found: {}", account_id)))
}

/// Applies a ledger entry to its account and journals it.
///
/// The account row must already be locked in `tx`. Debits that would take
/// the balance below zero fail with `InsufficientBalance`. Returns the new
/// balance.
pub async fn apply_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &NewLedgerEntry,
) -> Result<BigDecimal, AppError> {
    if entry.amount <= BigDecimal::from(0) {
        return Err(AppError::InvalidAmount(format!(
            "ledger amount must be positive, got {}",
            entry.amount
        )));
    }

    let new_balance: BigDecimal = if entry.entry_type.is_credit() {
        sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING balance
            "#,
        )
        .bind(entry.account_id)
        .bind(&entry.amount)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Account not found: {}", entry.account_id)))?
    } else {
        let debited: Option<BigDecimal> = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET balance = balance - $2, updated_at = NOW()
            WHERE id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(entry.account_id)
        .bind(&entry.amount)
        .fetch_optional(&mut **tx)
        .await?;

        match debited {
            Some(balance) => balance,
            None => {
                let account = load_account(&mut **tx, entry.account_id).await?;
                return Err(AppError::InsufficientBalance {
                    available: account.balance,
                    requested: entry.amount.clone(),
                });
            }
        }
    };

    sqlx::query(
        r#"
        INSERT INTO earnings_ledger (account_id, entry_type, amount, order_id, withdrawal_id, metadata)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.account_id)
    .bind(entry.entry_type)
    .bind(&entry.amount)
    .bind(entry.order_id)
    .bind(entry.withdrawal_id)
    .bind(&entry.metadata)
    .execute(&mut **tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Internal(format!(
            "duplicate {:?} entry for order {:?} / withdrawal {:?}",
            entry.entry_type, entry.order_id, entry.withdrawal_id
        )),
        other => AppError::Database(other),
    })?;

    tracing::debug!(
        account_id = %entry.account_id,
        entry_type = ?entry.entry_type,
        amount = %entry.amount,
        new_balance = %new_balance,
        "Ledger entry applied"
    );

    Ok(new_balance)
}

/// Credits a creator's net share of a completed sale.
///
/// Returns the credited amount; nothing is journaled when the platform keeps
/// the whole sale.
pub async fn credit_sale(
    tx: &mut Transaction<'_, Postgres>,
    creator_id: Uuid,
    order_id: Uuid,
    sale_amount: &BigDecimal,
    commission_percent: &BigDecimal,
) -> Result<BigDecimal, AppError> {
    let credit = creator_share(sale_amount, commission_percent);
    if credit <= BigDecimal::from(0) {
        return Ok(credit);
    }

    let entry = NewLedgerEntry::sale_credit(
        creator_id,
        order_id,
        credit.clone(),
        json!({
            "sale_amount": sale_amount.to_string(),
            "commission_percent": commission_percent.to_string(),
        }),
    );
    apply_entry(tx, &entry).await?;

    Ok(credit)
}

/// Most recent ledger entries of an account.
pub async fn recent_entries<'e, E>(
    executor: E,
    account_id: Uuid,
    limit: i64,
) -> Result<Vec<LedgerEntry>, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let entries = sqlx::query_as(
        r#"
        SELECT id, account_id, entry_type, amount, order_id, withdrawal_id, metadata, created_at
        FROM earnings_ledger
        WHERE account_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_creator_share_platform_keeps_twenty_percent() {
        assert_eq!(creator_share(&dec("10000"), &dec("20")), dec("8000.00"));
    }

    #[test]
    fn test_creator_share_bounds() {
        assert_eq!(creator_share(&dec("10000"), &dec("0")), dec("10000"));
        assert_eq!(creator_share(&dec("10000"), &dec("100")), dec("0"));
    }

    #[test]
    fn test_creator_share_rounds_half_away_from_zero() {
        // 0.05 * 0.9 = 0.045 -> 0.05
        assert_eq!(creator_share(&dec("0.05"), &dec("10")), dec("0.05"));
        // 0.15 * 0.7 = 0.105 -> 0.11
        assert_eq!(creator_share(&dec("0.15"), &dec("30")), dec("0.11"));
        // 1.01 * 0.875 = 0.88375 -> 0.88
        assert_eq!(creator_share(&dec("1.01"), &dec("12.5")), dec("0.88"));
    }

    #[test]
    fn test_creator_share_fractional_commission() {
        // 999.99 * 0.8325 = 832.491675 -> 832.49
        assert_eq!(creator_share(&dec("999.99"), &dec("16.75")), dec("832.49"));
    }

    #[test]
    fn test_round_currency_negative_half() {
        assert_eq!(round_currency(&dec("-0.125")), dec("-0.13"));
    }

    #[test]
    fn test_parse_amount_valid() {
        assert_eq!(parse_amount("6000").unwrap(), dec("6000.00"));
        assert_eq!(parse_amount(" 12.50 ").unwrap(), dec("12.5"));
    }

    #[test]
    fn test_parse_amount_rejects_non_positive() {
        assert!(matches!(parse_amount("0"), Err(AppError::InvalidAmount(_))));
        assert!(matches!(parse_amount("-5"), Err(AppError::InvalidAmount(_))));
    }

    #[test]
    fn test_parse_amount_rejects_huge_exponents_quickly() {
        let started = std::time::Instant::now();
        for raw in ["1e5000000", "1e100000", "-1e5000000", "1e-5000000", "1e12"] {
            assert!(
                matches!(parse_amount(raw), Err(AppError::InvalidAmount(_))),
                "{} should be refused",
                raw
            );
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_parse_amount_range() {
        assert_eq!(parse_amount("999999999999.99").unwrap(), dec("999999999999.99"));
        assert_eq!(parse_amount("5e3").unwrap(), dec("5000.00"));
        assert_eq!(parse_amount("12.500").unwrap(), dec("12.50"));
        assert!(matches!(
            parse_amount("1000000000000"),
            Err(AppError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_parse_amount_rejects_garbage_and_sub_unit() {
        assert!(matches!(parse_amount("ten"), Err(AppError::InvalidAmount(_))));
        assert!(matches!(parse_amount("1.005"), Err(AppError::InvalidAmount(_))));
    }
}
