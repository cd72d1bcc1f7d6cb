//! Server configuration loaded from environment variables.

use bigdecimal::BigDecimal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Shortest allowed validity window for a download token.
pub const MIN_DOWNLOAD_TTL_HOURS: i64 = 24;

/// Longest allowed validity window for a download token.
pub const MAX_DOWNLOAD_TTL_HOURS: i64 = 72;

/// Which payment gateway implementation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    /// Real QR gateway over HTTP.
    Qpay,
    /// In-memory gateway for local runs.
    Sandbox,
}

impl FromStr for GatewayMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qpay" => Ok(GatewayMode::Qpay),
            "sandbox" => Ok(GatewayMode::Sandbox),
            other => Err(ConfigError::Invalid {
                key: "GATEWAY_MODE",
                message: format!("unsupported mode '{}', expected qpay or sandbox", other),
            }),
        }
    }
}

/// Credentials and endpoint of the QR payment gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub invoice_code: String,
    /// Per-request timeout for gateway calls.
    pub timeout: Duration,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Newsstand server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Maximum pooled database connections.
    pub db_max_connections: u32,
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Externally reachable base URL, used for download links and gateway callbacks.
    pub public_base_url: String,
    pub gateway: GatewayConfig,
    /// Shared secret the gateway sends in `X-Webhook-Token`. Unchecked when unset.
    pub webhook_secret: Option<String>,
    /// Validity window of download tokens, in hours.
    pub download_ttl_hours: i64,
    /// Platform commission for creators without a membership.
    pub default_commission_percent: BigDecimal,
    pub min_withdrawal_amount: BigDecimal,
    pub min_recharge_amount: BigDecimal,
    pub max_recharge_amount: BigDecimal,
    /// Directory holding purchasable files, addressed by product file key.
    pub storage_dir: PathBuf,
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let mode: GatewayMode = lookup("GATEWAY_MODE")
            .unwrap_or_else(|| "sandbox".to_string())
            .parse()?;

        let gateway = match mode {
            GatewayMode::Qpay => GatewayConfig {
                mode,
                base_url: lookup("GATEWAY_BASE_URL")
                    .unwrap_or_else(|| "https://merchant.qpay.mn".to_string()),
                client_id: lookup("GATEWAY_CLIENT_ID")
                    .ok_or(ConfigError::Missing("GATEWAY_CLIENT_ID"))?,
                client_secret: lookup("GATEWAY_CLIENT_SECRET")
                    .ok_or(ConfigError::Missing("GATEWAY_CLIENT_SECRET"))?,
                invoice_code: lookup("GATEWAY_INVOICE_CODE")
                    .ok_or(ConfigError::Missing("GATEWAY_INVOICE_CODE"))?,
                timeout: Duration::from_secs(parse_or(&lookup, "GATEWAY_TIMEOUT_SECS", 10)?),
            },
            GatewayMode::Sandbox => GatewayConfig {
                mode,
                base_url: String::new(),
                client_id: String::new(),
                client_secret: String::new(),
                invoice_code: "SANDBOX".to_string(),
                timeout: Duration::from_secs(parse_or(&lookup, "GATEWAY_TIMEOUT_SECS", 10)?),
            },
        };

        let download_ttl_hours: i64 = parse_or(&lookup, "DOWNLOAD_TTL_HOURS", 48)?;
        if !(MIN_DOWNLOAD_TTL_HOURS..=MAX_DOWNLOAD_TTL_HOURS).contains(&download_ttl_hours) {
            return Err(ConfigError::Invalid {
                key: "DOWNLOAD_TTL_HOURS",
                message: format!(
                    "must be between {} and {}",
                    MIN_DOWNLOAD_TTL_HOURS, MAX_DOWNLOAD_TTL_HOURS
                ),
            });
        }

        let default_commission_percent =
            decimal_or(&lookup, "DEFAULT_COMMISSION_PERCENT", "20")?;
        if default_commission_percent < BigDecimal::from(0)
            || default_commission_percent > BigDecimal::from(100)
        {
            return Err(ConfigError::Invalid {
                key: "DEFAULT_COMMISSION_PERCENT",
                message: "must be between 0 and 100".to_string(),
            });
        }

        let min_recharge_amount = decimal_or(&lookup, "MIN_RECHARGE_AMOUNT", "100")?;
        let max_recharge_amount = decimal_or(&lookup, "MAX_RECHARGE_AMOUNT", "10000000")?;
        if min_recharge_amount > max_recharge_amount {
            return Err(ConfigError::Invalid {
                key: "MIN_RECHARGE_AMOUNT",
                message: "must not exceed MAX_RECHARGE_AMOUNT".to_string(),
            });
        }

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            public_base_url: lookup("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            gateway,
            webhook_secret: lookup("WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            download_ttl_hours,
            default_commission_percent,
            min_withdrawal_amount: decimal_or(&lookup, "MIN_WITHDRAWAL_AMOUNT", "1000")?,
            min_recharge_amount,
            max_recharge_amount,
            storage_dir: lookup("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("storage")),
        })
    }

    /// URL the gateway should call back when an invoice is paid.
    pub fn webhook_url(&self) -> String {
        format!("{}/api/v1/webhook", self.public_base_url)
    }

    /// Public URL for redeeming a download token.
    pub fn download_url(&self, token: &str) -> String {
        format!("{}/api/v1/download/{}", self.public_base_url, token)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
    }
}

fn decimal_or<F>(lookup: &F, key: &'static str, default: &str) -> Result<BigDecimal, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    BigDecimal::from_str(raw.trim()).map_err(|e| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}
