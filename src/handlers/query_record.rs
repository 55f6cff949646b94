use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;
use crate::models::{
    QueryAnalysisResponse, QueryListParams, QueryRecordResponse, QueryRecordSummary, QuerySort,
    QueryStats,
};
use crate::services::llm::AnalysisOutcome;
use crate::utils::{ApiError, ApiResult};

pub const ANALYSIS_FAILED_MESSAGE: &str = "Failed to analyze the query. Please try again later.";
pub const ALREADY_ANALYZED_MESSAGE: &str = "This query has already been analyzed.";
pub const ANALYZED_MESSAGE: &str = "Query analyzed successfully!";

#[derive(Debug, Serialize, ToSchema)]
pub struct SortOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueryListResponse {
    pub queries: Vec<QueryRecordSummary>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub stats: QueryStats,
    /// Distinct view names for the filter dropdown
    pub view_names: Vec<String>,
    pub sort_by: String,
    pub sort_options: Vec<SortOption>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzeStatus {
    Analyzed,
    AlreadyAnalyzed,
    Failed,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyzeResponse {
    pub status: AnalyzeStatus,
    pub message: String,
    pub analysis: Option<QueryAnalysisResponse>,
}

// List captured queries
#[utoipa::path(
    get,
    path = "/admin/query-optimizer/queries",
    params(QueryListParams),
    responses(
        (status = 200, description = "Filtered page of captured queries", body = QueryListResponse)
    ),
    tag = "Queries"
)]
pub async fn list_queries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryListParams>,
) -> ApiResult<Json<QueryListResponse>> {
    let filter = params.filter();
    let sort = params.sort();
    let page_request = params.page();

    tracing::debug!("Listing queries: filter={:?}, sort={}, page={}", filter, sort.as_str(), page_request.page);

    let page = state.ledger.list_records(&filter, sort, page_request).await?;
    let stats = state.ledger.record_stats(&filter).await?;
    let view_names = state.ledger.view_names().await?;

    Ok(Json(QueryListResponse {
        queries: page.items.iter().map(QueryRecordSummary::from).collect(),
        total: page.total,
        page: page.page,
        page_size: page.page_size,
        total_pages: page.total_pages,
        stats,
        view_names,
        sort_by: sort.as_str().to_string(),
        sort_options: QuerySort::ALL
            .iter()
            .map(|s| SortOption { value: s.as_str().to_string(), label: s.label().to_string() })
            .collect(),
    }))
}

// Get one captured query with its analysis
#[utoipa::path(
    get,
    path = "/admin/query-optimizer/queries/{id}",
    params(("id" = i64, Path, description = "Query record ID")),
    responses(
        (status = 200, description = "Query detail", body = QueryRecordResponse),
        (status = 404, description = "Query not found")
    ),
    tag = "Queries"
)]
pub async fn get_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<QueryRecordResponse>> {
    let record = state
        .ledger
        .get_record(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Query {} not found", id)))?;
    let analysis = state.ledger.get_analysis_for_record(id).await?;

    Ok(Json(QueryRecordResponse::new(record, analysis.as_ref().map(QueryAnalysisResponse::from))))
}

// Run AI analysis for one captured query
#[utoipa::path(
    post,
    path = "/admin/query-optimizer/queries/{id}/analyze",
    params(("id" = i64, Path, description = "Query record ID")),
    responses(
        (status = 200, description = "Analyzed, or already analyzed", body = AnalyzeResponse),
        (status = 404, description = "Query not found"),
        (status = 503, description = "Provider unavailable", body = AnalyzeResponse)
    ),
    tag = "Queries"
)]
pub async fn analyze_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<AnalyzeResponse>)> {
    tracing::info!("Analysis requested for query {}", id);

    let outcome = state.analyzer.analyze_record(id).await?;
    let (status_code, status, message) = match &outcome {
        AnalysisOutcome::Analyzed(_) => (StatusCode::OK, AnalyzeStatus::Analyzed, ANALYZED_MESSAGE),
        AnalysisOutcome::AlreadyAnalyzed(_) => {
            (StatusCode::OK, AnalyzeStatus::AlreadyAnalyzed, ALREADY_ANALYZED_MESSAGE)
        },
        AnalysisOutcome::Unavailable => {
            (StatusCode::SERVICE_UNAVAILABLE, AnalyzeStatus::Failed, ANALYSIS_FAILED_MESSAGE)
        },
    };

    Ok((
        status_code,
        Json(AnalyzeResponse {
            status,
            message: message.to_string(),
            analysis: outcome.analysis().map(QueryAnalysisResponse::from),
        }),
    ))
}
