use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::models::QueryAnalysisResponse;
use crate::utils::ellipsize;

/// Request query parameters, one key to many values (`?a=1&a=2`)
pub type QueryParams = BTreeMap<String, Vec<String>>;

/// One captured database query as stored in the ledger
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: i64,
    pub query: String,
    pub duration: f64,
    pub timestamp: DateTime<Utc>,
    pub is_slow: bool,
    pub view_name: Option<String>,
    pub url_path: Option<String>,
    pub stack_trace: String,
    #[serde(skip)]
    pub query_params_json: String,
    pub request_method: Option<String>,
    pub request_content_type: Option<String>,
    pub response_status_code: Option<u16>,
}

impl QueryRecord {
    pub fn query_params(&self) -> QueryParams {
        serde_json::from_str(&self.query_params_json).unwrap_or_else(|e| {
            tracing::warn!("Query {} has unreadable query params: {}", self.id, e);
            QueryParams::new()
        })
    }

    /// Duration with millisecond precision, e.g. `0.512s`
    pub fn formatted_duration(&self) -> String {
        format!("{:.3}s", self.duration)
    }

    /// First 100 characters of the query
    pub fn short_query(&self) -> String {
        ellipsize(&self.query, 100)
    }
}

/// Row to append to the ledger; the ledger stamps id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueryRecord {
    pub query: String,
    pub duration: f64,
    pub is_slow: bool,
    pub view_name: Option<String>,
    pub url_path: Option<String>,
    pub stack_trace: String,
    pub query_params_json: String,
    pub request_method: Option<String>,
    pub request_content_type: Option<String>,
    pub response_status_code: Option<u16>,
}

/// Listing row: the record plus whether it has been analyzed
#[derive(Debug, Clone, FromRow)]
pub struct QueryRecordView {
    #[sqlx(flatten)]
    pub record: QueryRecord,
    pub analysis_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueryRecordSummary {
    pub id: i64,
    pub short_query: String,
    pub duration: f64,
    pub formatted_duration: String,
    pub timestamp: DateTime<Utc>,
    pub is_slow: bool,
    pub view_name: Option<String>,
    pub url_path: Option<String>,
    pub request_method: Option<String>,
    pub response_status_code: Option<u16>,
    pub analysis_id: Option<i64>,
}

impl From<&QueryRecordView> for QueryRecordSummary {
    fn from(v: &QueryRecordView) -> Self {
        let r = &v.record;
        Self {
            id: r.id,
            short_query: r.short_query(),
            duration: r.duration,
            formatted_duration: r.formatted_duration(),
            timestamp: r.timestamp,
            is_slow: r.is_slow,
            view_name: r.view_name.clone(),
            url_path: r.url_path.clone(),
            request_method: r.request_method.clone(),
            response_status_code: r.response_status_code,
            analysis_id: v.analysis_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueryRecordResponse {
    pub id: i64,
    pub query: String,
    pub duration: f64,
    pub formatted_duration: String,
    pub timestamp: DateTime<Utc>,
    pub is_slow: bool,
    pub view_name: Option<String>,
    pub url_path: Option<String>,
    pub stack_trace: String,
    pub query_params: BTreeMap<String, Vec<String>>,
    pub request_method: Option<String>,
    pub request_content_type: Option<String>,
    pub response_status_code: Option<u16>,
    pub analysis: Option<QueryAnalysisResponse>,
}

impl QueryRecordResponse {
    pub fn new(record: QueryRecord, analysis: Option<QueryAnalysisResponse>) -> Self {
        Self {
            query_params: record.query_params(),
            formatted_duration: record.formatted_duration(),
            id: record.id,
            query: record.query,
            duration: record.duration,
            timestamp: record.timestamp,
            is_slow: record.is_slow,
            view_name: record.view_name,
            url_path: record.url_path,
            stack_trace: record.stack_trace,
            request_method: record.request_method,
            request_content_type: record.request_content_type,
            response_status_code: record.response_status_code,
            analysis,
        }
    }
}

/// Aggregate counters shown above the query list
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize, ToSchema)]
pub struct QueryStats {
    pub total_count: i64,
    pub slow_count: i64,
    pub analyzed_count: i64,
}
