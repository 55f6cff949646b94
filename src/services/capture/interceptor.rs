//! Capture interceptor
//!
//! Shared contract behind the request middleware and [`track_queries`](super::track_queries):
//! open a session on the current query log, run the unit of work, diff the log,
//! and append the interesting statements to the ledger. Capture problems are
//! logged and counted, never surfaced to the unit of work.

use futures::FutureExt;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use super::context::{ResponseStatus, UnitOfWorkContext};
use super::query_log::{CaptureSession, ExecutedQuery, QueryLog};
use crate::config::OptimizerConfig;
use crate::models::{NewQueryRecord, QueryParams};
use crate::services::{LedgerError, QueryLedger};
use crate::utils::{StringExt, truncate_chars};

/// Prefixes never captured, whatever the configuration says
pub const BUILTIN_EXCLUDED_PATHS: [&str; 3] = ["/admin/", "/static/", "/media/"];

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Invalid duration '{raw}' for query: {query}")]
    InvalidDuration { raw: String, query: String },

    #[error("Failed to serialize query params: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to store query: {0}")]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub enabled: bool,
    /// Seconds; a query is slow when its duration is strictly greater
    pub slow_query_threshold: f64,
    pub capture_stack: bool,
    pub capture_params: bool,
    /// Lowercased; empty means every query is kept
    pub watched_models: Vec<String>,
    /// Configured prefixes plus [`BUILTIN_EXCLUDED_PATHS`]
    pub excluded_paths: Vec<String>,
    pub log_capacity: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from_config(&OptimizerConfig::default())
    }
}

impl CaptureSettings {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        let watched_models = config
            .watched_models
            .iter()
            .filter_map(|m| m.clean())
            .map(|m| m.to_lowercase())
            .collect();

        let mut excluded_paths: Vec<String> =
            BUILTIN_EXCLUDED_PATHS.iter().map(|p| p.to_string()).collect();
        for path in config.excluded_paths.iter().filter_map(|p| p.clean()) {
            if !excluded_paths.contains(&path) {
                excluded_paths.push(path);
            }
        }

        Self {
            enabled: config.enabled,
            slow_query_threshold: config.slow_query_threshold,
            capture_stack: config.capture_stack,
            capture_params: config.capture_params,
            watched_models,
            excluded_paths,
            log_capacity: config.query_log_capacity,
        }
    }

    pub fn with_overrides(mut self, overrides: &CaptureOverrides) -> Self {
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if let Some(threshold) = overrides.slow_query_threshold {
            if threshold.is_finite() && threshold >= 0.0 {
                self.slow_query_threshold = threshold;
            } else {
                tracing::warn!(
                    "Ignoring invalid slow_query_threshold override {} (keep {})",
                    threshold,
                    self.slow_query_threshold
                );
            }
        }
        if let Some(capture_stack) = overrides.capture_stack {
            self.capture_stack = capture_stack;
        }
        if let Some(capture_params) = overrides.capture_params {
            self.capture_params = capture_params;
        }
        self
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn is_watched(&self, sql: &str) -> bool {
        if self.watched_models.is_empty() {
            return true;
        }
        let sql = sql.to_lowercase();
        self.watched_models.iter().any(|model| sql.contains(model.as_str()))
    }
}

/// Per-call settings for a single handler; `None` keeps the global value
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CaptureOverrides {
    pub enabled: Option<bool>,
    pub slow_query_threshold: Option<f64>,
    pub capture_stack: Option<bool>,
    pub capture_params: Option<bool>,
}

// ============================================================================
// Batches
// ============================================================================

/// Opaque handle returned by [`CaptureInterceptor::begin_capture`]
pub struct CaptureToken {
    session: CaptureSession,
    started: Instant,
}

/// One retained statement with its unit-of-work context attached
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedQuery {
    pub query: String,
    pub duration: f64,
    pub is_slow: bool,
    pub view_name: String,
    pub url_path: String,
    pub stack_trace: String,
    pub query_params: QueryParams,
    pub request_method: Option<String>,
    pub request_content_type: Option<String>,
    pub response_status_code: u16,
}

impl CapturedQuery {
    pub fn into_new_record(self) -> Result<NewQueryRecord, CaptureError> {
        let query_params_json = serde_json::to_string(&self.query_params)?;
        Ok(NewQueryRecord {
            query: self.query,
            duration: self.duration,
            is_slow: self.is_slow,
            view_name: Some(self.view_name),
            url_path: Some(self.url_path),
            stack_trace: self.stack_trace,
            query_params_json,
            request_method: self.request_method,
            request_content_type: self.request_content_type,
            response_status_code: Some(self.response_status_code),
        })
    }

    fn preview(&self) -> String {
        preview(&self.query)
    }
}

/// Delta of one unit of work, ready to persist
#[derive(Debug, Default)]
pub struct CapturedBatch {
    pub queries: Vec<CapturedQuery>,
    /// Statements executed during the unit, before filtering
    pub executed: usize,
    pub elapsed: Duration,
    pub failures: Vec<CaptureError>,
}

#[derive(Debug, Default)]
pub struct CaptureOutcome {
    pub written: usize,
    pub failures: Vec<CaptureError>,
}

// ============================================================================
// Interceptor
// ============================================================================

#[derive(Clone)]
pub struct CaptureInterceptor {
    settings: CaptureSettings,
    ledger: QueryLedger,
}

impl CaptureInterceptor {
    pub fn new(settings: CaptureSettings, ledger: QueryLedger) -> Self {
        Self { settings, ledger }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Copy of this interceptor with per-call settings applied
    pub fn with_overrides(&self, overrides: &CaptureOverrides) -> Self {
        Self {
            settings: self.settings.clone().with_overrides(overrides),
            ledger: self.ledger.clone(),
        }
    }

    pub fn should_capture(&self, ctx: &UnitOfWorkContext) -> bool {
        self.settings.enabled && !self.settings.is_excluded(&ctx.request.path)
    }

    /// Open a session on the current query log
    pub fn begin_capture(&self) -> CaptureToken {
        CaptureToken {
            session: QueryLog::current().open_capture_session(),
            started: Instant::now(),
        }
    }

    /// Collect what the unit of work executed since `token` was taken
    pub fn end_capture(&self, token: CaptureToken, ctx: &UnitOfWorkContext) -> CapturedBatch {
        let executed = token.session.queries_since_open();
        let mut batch = CapturedBatch {
            executed: executed.len(),
            elapsed: token.started.elapsed(),
            ..Default::default()
        };

        let watched: Vec<ExecutedQuery> =
            executed.into_iter().filter(|q| self.settings.is_watched(&q.sql)).collect();
        if watched.is_empty() {
            return batch;
        }

        let stack_trace = if self.settings.capture_stack {
            Backtrace::force_capture().to_string()
        } else {
            String::new()
        };
        let query_params = if self.settings.capture_params {
            ctx.request.query_params.clone()
        } else {
            QueryParams::new()
        };
        let view_name = ctx.view_name();
        let status = ctx.effective_status();

        for entry in watched {
            let duration = match parse_duration(&entry.time) {
                Some(d) => d,
                None => {
                    let err = CaptureError::InvalidDuration {
                        raw: entry.time,
                        query: preview(&entry.sql),
                    };
                    tracing::error!("Skipping captured query: {}", err);
                    batch.failures.push(err);
                    continue;
                },
            };

            batch.queries.push(CapturedQuery {
                is_slow: duration > self.settings.slow_query_threshold,
                query: entry.sql,
                duration,
                view_name: view_name.clone(),
                url_path: ctx.request.path.clone(),
                stack_trace: stack_trace.clone(),
                query_params: query_params.clone(),
                request_method: ctx.request.method.clone(),
                request_content_type: ctx.request.content_type.clone(),
                response_status_code: status,
            });
        }

        batch
    }

    /// Append each captured query to the ledger. Never fails as a whole.
    pub async fn persist(&self, batch: CapturedBatch) -> CaptureOutcome {
        let mut outcome = CaptureOutcome { written: 0, failures: batch.failures };

        for captured in batch.queries {
            if captured.is_slow {
                tracing::warn!(
                    "Slow query ({:.3}s) in {}: status={}, content_type={}, query={}",
                    captured.duration,
                    captured.view_name,
                    captured.response_status_code,
                    captured.request_content_type.as_deref().unwrap_or("-"),
                    captured.preview()
                );
            }

            match self.write_one(captured).await {
                Ok(()) => outcome.written += 1,
                Err(e) => {
                    tracing::error!("Failed to record query: {}", e);
                    outcome.failures.push(e);
                },
            }
        }

        outcome
    }

    async fn write_one(&self, captured: CapturedQuery) -> Result<(), CaptureError> {
        let record = captured.into_new_record()?;
        self.ledger.insert_record(&record).await?;
        Ok(())
    }

    /// End the session, persist, and log the per-unit summary
    pub async fn complete(&self, token: CaptureToken, ctx: &UnitOfWorkContext) -> CaptureOutcome {
        let batch = self.end_capture(token, ctx);
        tracing::debug!(
            "Request {} {} - {} queries in {:.3}s",
            ctx.request.method.as_deref().unwrap_or("-"),
            ctx.request.path,
            batch.executed,
            batch.elapsed.as_secs_f64()
        );
        self.persist(batch).await
    }

    /// Run `work` as one captured unit.
    ///
    /// The output is returned untouched. If `work` panics the queries it ran
    /// are still recorded (with status 500) and the panic is resumed.
    pub async fn instrument<F, T>(&self, ctx: UnitOfWorkContext, work: F) -> T
    where
        F: Future<Output = T>,
        T: ResponseStatus,
    {
        if !self.should_capture(&ctx) {
            return work.await;
        }

        let log = QueryLog::scoped()
            .unwrap_or_else(|| QueryLog::with_capacity(self.settings.log_capacity));

        log.scope(async move {
            let token = self.begin_capture();
            let result = AssertUnwindSafe(work).catch_unwind().await;

            let status = match &result {
                Ok(output) => output.status_code(),
                Err(_) => Some(500),
            };
            let ctx = ctx.with_status(status);
            let outcome = self.complete(token, &ctx).await;
            if !outcome.failures.is_empty() {
                tracing::error!(
                    "{} of {} captured queries for {} were not recorded",
                    outcome.failures.len(),
                    outcome.written + outcome.failures.len(),
                    ctx.request.path
                );
            }

            match result {
                Ok(output) => output,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
        .await
    }
}

/// At most `PREVIEW_CHARS` characters, ellipsis included
fn preview(sql: &str) -> String {
    if sql.chars().count() <= PREVIEW_CHARS {
        return sql.to_string();
    }
    format!("{}...", truncate_chars(sql, PREVIEW_CHARS - 3))
}

/// Driver-reported seconds; rejects negative and non-finite values
fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0.012"), Some(0.012));
        assert_eq!(parse_duration(" 3 "), Some(3.0));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("-0.5"), None);
        assert_eq!(parse_duration("inf"), None);
        assert_eq!(parse_duration("NaN"), None);
    }

    #[test]
    fn test_builtin_exclusions_always_apply() {
        let config = OptimizerConfig {
            excluded_paths: vec!["/health".into(), "/admin/".into(), "  ".into()],
            ..Default::default()
        };
        let settings = CaptureSettings::from_config(&config);

        assert_eq!(settings.excluded_paths, vec!["/admin/", "/static/", "/media/", "/health"]);
        assert!(settings.is_excluded("/static/app.css"));
        assert!(settings.is_excluded("/healthz"));
        assert!(!settings.is_excluded("/orders"));
    }

    #[test]
    fn test_watched_models_match_case_insensitively() {
        let config =
            OptimizerConfig { watched_models: vec!["Order".into()], ..Default::default() };
        let settings = CaptureSettings::from_config(&config);

        assert!(settings.is_watched("SELECT * FROM shop_order WHERE id = 1"));
        assert!(!settings.is_watched("SELECT * FROM django_session"));
        assert!(CaptureSettings::default().is_watched("SELECT 1"));
    }

    #[test]
    fn test_overrides_replace_only_given_values() {
        let base = CaptureSettings::default();
        let overridden = base.clone().with_overrides(&CaptureOverrides {
            slow_query_threshold: Some(2.0),
            capture_stack: Some(false),
            ..Default::default()
        });

        assert_eq!(overridden.slow_query_threshold, 2.0);
        assert!(!overridden.capture_stack);
        assert_eq!(overridden.enabled, base.enabled);
        assert_eq!(overridden.capture_params, base.capture_params);
    }

    #[test]
    fn test_preview_never_exceeds_limit() {
        let long = "SELECT ".to_string() + &"x".repeat(200);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS);
        assert!(cut.ends_with("..."));

        let exact = "y".repeat(PREVIEW_CHARS);
        assert_eq!(preview(&exact), exact);
    }

    #[test]
    fn test_invalid_threshold_override_is_ignored() {
        let base = CaptureSettings::default();
        for bad in [f64::NAN, -0.1, f64::INFINITY] {
            let overridden = base.clone().with_overrides(&CaptureOverrides {
                slow_query_threshold: Some(bad),
                ..Default::default()
            });
            assert_eq!(overridden.slow_query_threshold, base.slow_query_threshold, "{}", bad);
        }

        let zero = base.with_overrides(&CaptureOverrides {
            slow_query_threshold: Some(0.0),
            ..Default::default()
        });
        assert_eq!(zero.slow_query_threshold, 0.0);
    }
}
