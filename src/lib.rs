//! Query Optimizer Library
//!
//! Captures the database queries each request runs, keeps them in a SQLite
//! ledger, and asks an AI provider for optimization advice on demand.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use services::{
    CaptureInterceptor, CaptureOverrides, CaptureSettings, LedgerError, QueryAnalyzer, QueryLedger,
    QueryLog, UnitOfWorkContext, record_query, track_queries,
};

/// Mount point of the admin API
pub const ADMIN_PREFIX: &str = "/admin/query-optimizer";

/// Application shared state
///
/// All services are cheap to clone; the analyzer holds a trait object and is
/// shared through an Arc.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub ledger: QueryLedger,
    pub interceptor: CaptureInterceptor,
    pub analyzer: Arc<QueryAnalyzer>,
}

impl AppState {
    pub fn new(db: SqlitePool, settings: CaptureSettings, analyzer: QueryAnalyzer) -> Self {
        let ledger = QueryLedger::new(db.clone());
        Self {
            interceptor: CaptureInterceptor::new(settings, ledger.clone()),
            ledger,
            db,
            analyzer: Arc::new(analyzer),
        }
    }
}

/// Admin API routes, mounted under [`ADMIN_PREFIX`]
pub fn admin_router(state: Arc<AppState>) -> Router {
    let routes = Router::new()
        .route("/queries", get(handlers::query_record::list_queries))
        .route("/queries/:id", get(handlers::query_record::get_query))
        .route("/queries/:id/analyze", post(handlers::query_record::analyze_query))
        .route("/analyses", get(handlers::query_analysis::list_analyses))
        .route("/analyses/applied", post(handlers::query_analysis::mark_applied))
        .route("/analyses/:id", get(handlers::query_analysis::get_analysis))
        .with_state(state);

    Router::new().nest(ADMIN_PREFIX, routes)
}

/// Wrap host routes with whole-request capture and add the admin API.
///
/// The capture layer sits on the host routes only; the admin prefix is also
/// excluded by default.
pub fn app(host_routes: Router, state: Arc<AppState>) -> Router {
    let captured = host_routes.layer(axum_middleware::from_fn_with_state(
        state.interceptor.clone(),
        middleware::query_capture_middleware,
    ));

    captured.merge(admin_router(state))
}
