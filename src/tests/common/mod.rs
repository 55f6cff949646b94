// Common test utilities and helpers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::AppState;
use crate::config::OptimizerConfig;
use crate::models::{NewQueryRecord, QueryRecord};
use crate::services::llm::{AnalysisProvider, ProviderError, ProviderKind, QueryAnalyzer};
use crate::services::{CaptureInterceptor, CaptureSettings, QueryLedger};

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Capture settings with a 0.5s threshold and no stack capture
pub fn test_settings() -> CaptureSettings {
    CaptureSettings::from_config(&OptimizerConfig {
        capture_stack: false,
        ..Default::default()
    })
}

pub fn test_interceptor(pool: &SqlitePool, settings: CaptureSettings) -> CaptureInterceptor {
    CaptureInterceptor::new(settings, QueryLedger::new(pool.clone()))
}

/// Provider with a canned answer; `None` fails every call
pub struct FakeProvider {
    answer: Option<String>,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self { answer: Some(answer.to_string()), calls: AtomicUsize::new(0) })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { answer: None, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn analyze(&self, _prompt: &str, _model: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone().ok_or(ProviderError::EmptyResponse(ProviderKind::Anthropic))
    }
}

pub async fn create_test_state(provider: Arc<FakeProvider>) -> Arc<AppState> {
    let pool = create_test_db().await;
    let analyzer = QueryAnalyzer::new(provider, "test-model", QueryLedger::new(pool.clone()));
    Arc::new(AppState::new(pool, test_settings(), analyzer))
}

/// Minimal record for ledger tests
pub fn new_record(query: &str, duration: f64, view_name: &str) -> NewQueryRecord {
    NewQueryRecord {
        query: query.to_string(),
        duration,
        is_slow: duration > 0.5,
        view_name: Some(view_name.to_string()),
        url_path: Some(format!("/{}", view_name)),
        stack_trace: String::new(),
        query_params_json: "{}".to_string(),
        request_method: Some("GET".to_string()),
        request_content_type: None,
        response_status_code: Some(200),
    }
}

pub async fn insert_record(ledger: &QueryLedger, query: &str, duration: f64, view_name: &str) -> QueryRecord {
    ledger
        .insert_record(&new_record(query, duration, view_name))
        .await
        .expect("Failed to insert query record")
}

pub async fn set_record_timestamp(pool: &SqlitePool, id: i64, timestamp: DateTime<Utc>) {
    sqlx::query("UPDATE query_records SET timestamp = ? WHERE id = ?")
        .bind(timestamp)
        .bind(id)
        .execute(pool)
        .await
        .expect("Failed to update timestamp");
}

pub async fn set_analysis_created_at(pool: &SqlitePool, id: i64, created_at: DateTime<Utc>) {
    sqlx::query("UPDATE query_analyses SET created_at = ? WHERE id = ?")
        .bind(created_at)
        .bind(id)
        .execute(pool)
        .await
        .expect("Failed to update created_at");
}

pub async fn all_records(pool: &SqlitePool) -> Vec<QueryRecord> {
    sqlx::query_as::<_, QueryRecord>("SELECT * FROM query_records ORDER BY id")
        .fetch_all(pool)
        .await
        .expect("Failed to load query records")
}
