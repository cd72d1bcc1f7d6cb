//! Newsstand server binary.

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsstand_server::config::{Config, GatewayMode};
use newsstand_server::gateway::{QpayGateway, SandboxGateway};
use newsstand_server::{create_router, db, AppState};

const DEFAULT_LOG_FILTER: &str = "newsstand_server=info,tower_http=info";

/// Initializes tracing from `RUST_LOG`, with JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let state = match config.gateway.mode {
        GatewayMode::Qpay => {
            let gateway = QpayGateway::new(&config.gateway).context("failed to build gateway client")?;
            AppState::new(pool, Arc::new(gateway), config)
        }
        GatewayMode::Sandbox => {
            tracing::warn!("Running with the sandbox payment gateway");
            AppState::with_sandbox(pool, Arc::new(SandboxGateway::new()), config)
        }
    };

    let bind_addr = state.config.bind_addr;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!(addr = %bind_addr, "Newsstand server listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
