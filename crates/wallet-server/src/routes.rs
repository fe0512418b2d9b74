//! API route definitions.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::AppState;

/// Create API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Chain feed
        .route("/api/diffs", post(handlers::push_diff))
        .route("/api/sync/status", get(handlers::sync_status))
        // Wallet views
        .route("/api/balances", get(handlers::balances))
        .route("/api/notes", get(handlers::notes))
        .route("/api/proof/:index", get(handlers::proof))
        // Utility endpoints
        .route("/api/address/generate", post(handlers::generate_address))
}
