//! API routes for the Newsstand server.

pub mod accounts;
pub mod downloads;
pub mod membership;
pub mod payments;
pub mod sandbox;
pub mod withdrawals;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Creates the main API router with all routes mounted.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Creates the v1 API routes.
fn api_v1_routes(state: AppState) -> Router {
    let mut router = Router::new()
        .merge(payments::router(state.clone()))
        .nest("/accounts", accounts::router(state.clone()))
        .nest("/membership", membership::router(state.clone()))
        .nest("/withdrawals", withdrawals::router(state.clone()))
        .nest("/download", downloads::router(state.clone()));

    if let Some(sandbox) = state.sandbox {
        router = router.nest("/sandbox", sandbox::router(sandbox));
    }
    router
}
