use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;
use crate::models::{AnalysisDetailResponse, AnalysisListParams, QueryAnalysisResponse};
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalysisListResponse {
    pub analyses: Vec<QueryAnalysisResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkAppliedRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkAppliedResponse {
    pub updated: u64,
    pub message: String,
}

// List analyses, newest first
#[utoipa::path(
    get,
    path = "/admin/query-optimizer/analyses",
    params(AnalysisListParams),
    responses(
        (status = 200, description = "Page of analyses", body = AnalysisListResponse)
    ),
    tag = "Analyses"
)]
pub async fn list_analyses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalysisListParams>,
) -> ApiResult<Json<AnalysisListResponse>> {
    let page = state.ledger.list_analyses(&params.dates(), params.page()).await?;

    Ok(Json(AnalysisListResponse {
        analyses: page.items.iter().map(QueryAnalysisResponse::from).collect(),
        total: page.total,
        page: page.page,
        page_size: page.page_size,
        total_pages: page.total_pages,
    }))
}

// Get one analysis with its query context
#[utoipa::path(
    get,
    path = "/admin/query-optimizer/analyses/{id}",
    params(("id" = i64, Path, description = "Analysis ID")),
    responses(
        (status = 200, description = "Analysis detail", body = AnalysisDetailResponse),
        (status = 404, description = "Analysis not found")
    ),
    tag = "Analyses"
)]
pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<AnalysisDetailResponse>> {
    let analysis = state
        .ledger
        .get_analysis(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Analysis {} not found", id)))?;
    let record = state
        .ledger
        .get_record(analysis.query_record_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Query {} not found", analysis.query_record_id)))?;

    Ok(Json(AnalysisDetailResponse::new(&analysis, &record)))
}

// Mark analyses as applied
#[utoipa::path(
    post,
    path = "/admin/query-optimizer/analyses/applied",
    request_body = MarkAppliedRequest,
    responses(
        (status = 200, description = "Analyses marked as applied", body = MarkAppliedResponse),
        (status = 400, description = "No analysis IDs given")
    ),
    tag = "Analyses"
)]
pub async fn mark_applied(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MarkAppliedRequest>,
) -> ApiResult<Json<MarkAppliedResponse>> {
    if req.ids.is_empty() {
        return Err(ApiError::validation_error("No analyses selected"));
    }

    let updated = state.ledger.mark_applied(&req.ids).await?;
    Ok(Json(MarkAppliedResponse {
        updated,
        message: format!("{} analyses marked as applied.", updated),
    }))
}
