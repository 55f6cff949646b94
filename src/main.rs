use axum::{Router, routing::get};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use query_optimizer::config::Config;
use query_optimizer::services::{CaptureSettings, QueryAnalyzer, QueryLedger};
use query_optimizer::{AppState, db, handlers, models};

#[derive(OpenApi)]
#[openapi(
    paths(
        // Queries
        handlers::query_record::list_queries,
        handlers::query_record::get_query,
        handlers::query_record::analyze_query,
        // Analyses
        handlers::query_analysis::list_analyses,
        handlers::query_analysis::get_analysis,
        handlers::query_analysis::mark_applied,
    ),
    components(
        schemas(
            models::QueryRecordSummary,
            models::QueryRecordResponse,
            models::QueryStats,
            models::QueryAnalysisResponse,
            models::AnalysisSections,
            models::AnalysisDetailResponse,
            handlers::query_record::SortOption,
            handlers::query_record::QueryListResponse,
            handlers::query_record::AnalyzeStatus,
            handlers::query_record::AnalyzeResponse,
            handlers::query_analysis::AnalysisListResponse,
            handlers::query_analysis::MarkAppliedRequest,
            handlers::query_analysis::MarkAppliedResponse,
            query_optimizer::utils::error::ErrorBody,
        )
    ),
    tags(
        (name = "Queries", description = "Captured query ledger"),
        (name = "Analyses", description = "AI optimization analyses"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();

    // Load configuration first
    let config = Config::load()?;

    // Initialize logging
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);

    let registry = tracing_subscriber::registry().with(log_filter);

    // Keeps the file writer flushing until main returns
    let mut _log_guard = None;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("query_optimizer.log");
        // Rolling appender adds a date suffix
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _log_guard = Some(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Query Optimizer starting up");
    tracing::info!("Configuration loaded successfully");

    // Provider, model and credential must all be set; fail before serving
    let provider_settings = config.ai.validate()?;
    tracing::info!(
        "AI provider: {} (model {})",
        provider_settings.kind,
        provider_settings.model
    );

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database pool created successfully");

    let analyzer = QueryAnalyzer::from_settings(&provider_settings, QueryLedger::new(pool.clone()))?;
    let settings = CaptureSettings::from_config(&config.optimizer);
    tracing::info!(
        "Query capture: enabled={}, threshold={}s, watched_models={:?}, excluded_paths={:?}",
        settings.enabled,
        settings.slow_query_threshold,
        settings.watched_models,
        settings.excluded_paths
    );

    let app_state = Arc::new(AppState::new(pool, settings, analyzer));

    let host_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let app = query_optimizer::app(host_routes, app_state)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Admin API available at http://{}{}", addr, query_optimizer::ADMIN_PREFIX);
    tracing::info!("API documentation available at http://{}/api-docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}
