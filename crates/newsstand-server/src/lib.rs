//! Newsstand Server - settlement engine for the Newsstand marketplace
//!
//! Turns gateway payment confirmations into exactly-once order settlement,
//! keeps the creators' earnings ledger, issues single-use download
//! credentials and processes withdrawal requests.

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod gateway;
pub mod invoices;
pub mod ledger;
pub mod models;
pub mod routes;
pub mod settlement;
pub mod state;
pub mod subscription;

pub use config::Config;
pub use error::AppError;
pub use routes::create_router;
pub use state::AppState;
