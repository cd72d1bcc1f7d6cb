//! Shared application state handed to every router.

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::gateway::{PaymentGateway, SandboxGateway};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub gateway: Arc<dyn PaymentGateway>,
    pub config: Arc<Config>,
    /// Set when running against the in-memory gateway; enables `/sandbox` routes.
    pub sandbox: Option<Arc<SandboxGateway>>,
}

impl AppState {
    pub fn new(pool: PgPool, gateway: Arc<dyn PaymentGateway>, config: Config) -> Self {
        Self {
            pool,
            gateway,
            config: Arc::new(config),
            sandbox: None,
        }
    }

    /// State backed by a sandbox gateway that callers can drive directly.
    pub fn with_sandbox(pool: PgPool, sandbox: Arc<SandboxGateway>, config: Config) -> Self {
        Self {
            pool,
            gateway: sandbox.clone(),
            config: Arc::new(config),
            sandbox: Some(sandbox),
        }
    }
}
