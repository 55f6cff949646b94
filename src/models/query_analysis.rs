use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::models::QueryRecord;

pub const KEY_ANALYSIS: &str = "analysis";
pub const KEY_OPTIMIZATION_SUGGESTIONS: &str = "optimization_suggestions";
pub const KEY_OPTIMIZED_QUERY: &str = "optimized_query";
pub const KEY_INDEX_SUGGESTIONS: &str = "index_suggestions";
pub const KEY_ORM_IMPROVEMENTS: &str = "django_orm_improvements";

/// Keys every provider is asked to fill, in prompt order
pub const ANALYSIS_KEYS: [&str; 5] = [
    KEY_ANALYSIS,
    KEY_OPTIMIZATION_SUGGESTIONS,
    KEY_OPTIMIZED_QUERY,
    KEY_INDEX_SUGGESTIONS,
    KEY_ORM_IMPROVEMENTS,
];

/// Parsed provider answer. Provider-specific keys are kept as-is.
pub type StructuredAnalysis = Map<String, Value>;

/// Render one analysis value for display: strings verbatim, null/absent empty,
/// anything else as compact JSON.
pub fn analysis_text(analysis: &StructuredAnalysis, key: &str) -> String {
    match analysis.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// AI analysis linked one-to-one to a query record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub id: i64,
    pub query_record_id: i64,
    #[serde(skip)]
    pub analysis_json: String,
    pub suggested_optimization: String,
    pub created_at: DateTime<Utc>,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

impl QueryAnalysis {
    pub fn analysis(&self) -> StructuredAnalysis {
        match serde_json::from_str::<Value>(&self.analysis_json) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!("Analysis {} is not a JSON object", self.id);
                StructuredAnalysis::new()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewQueryAnalysis {
    pub query_record_id: i64,
    pub analysis: StructuredAnalysis,
    pub suggested_optimization: String,
}

impl NewQueryAnalysis {
    /// Build from a parsed analysis, copying the suggestions into the listing column
    pub fn from_analysis(query_record_id: i64, analysis: StructuredAnalysis) -> Self {
        let suggested_optimization = analysis_text(&analysis, KEY_OPTIMIZATION_SUGGESTIONS);
        Self { query_record_id, analysis, suggested_optimization }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueryAnalysisResponse {
    pub id: i64,
    pub query_record_id: i64,
    #[schema(value_type = Object)]
    pub analysis: Value,
    pub suggested_optimization: String,
    pub created_at: DateTime<Utc>,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

impl From<&QueryAnalysis> for QueryAnalysisResponse {
    fn from(a: &QueryAnalysis) -> Self {
        Self {
            id: a.id,
            query_record_id: a.query_record_id,
            analysis: Value::Object(a.analysis()),
            suggested_optimization: a.suggested_optimization.clone(),
            created_at: a.created_at,
            applied: a.applied,
            applied_at: a.applied_at,
        }
    }
}

/// The five prompt sections, flattened to text for display
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct AnalysisSections {
    pub analysis: String,
    pub optimization_suggestions: String,
    pub optimized_query: String,
    pub index_suggestions: String,
    pub django_orm_improvements: String,
}

/// Analysis detail page payload
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalysisDetailResponse {
    pub id: i64,
    pub query_record_id: i64,
    pub query_preview: String,
    pub formatted_duration: String,
    pub is_slow: bool,
    pub created_at: DateTime<Utc>,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
    pub analysis_data: AnalysisSections,
}

impl AnalysisDetailResponse {
    pub fn new(analysis: &QueryAnalysis, record: &QueryRecord) -> Self {
        let parsed = analysis.analysis();
        Self {
            id: analysis.id,
            query_record_id: record.id,
            query_preview: record.short_query(),
            formatted_duration: record.formatted_duration(),
            is_slow: record.is_slow,
            created_at: analysis.created_at,
            applied: analysis.applied,
            applied_at: analysis.applied_at,
            analysis_data: AnalysisSections {
                analysis: analysis_text(&parsed, KEY_ANALYSIS),
                optimization_suggestions: analysis.suggested_optimization.clone(),
                optimized_query: analysis_text(&parsed, KEY_OPTIMIZED_QUERY),
                index_suggestions: analysis_text(&parsed, KEY_INDEX_SUGGESTIONS),
                django_orm_improvements: analysis_text(&parsed, KEY_ORM_IMPROVEMENTS),
            },
        }
    }
}
