//! Query Ledger - SQLite store for captured queries and their analyses

use chrono::Utc;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Arguments, SqlitePool};

use crate::models::{
    AnalysisStatus, DateRange, NewQueryAnalysis, NewQueryRecord, Page, PageRequest, QueryAnalysis,
    QueryFilter, QueryRecord, QueryRecordView, QuerySort, QueryStats, Slowness,
};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Query record not found: {0}")]
    RecordNotFound(i64),

    #[error("Query analysis not found: {0}")]
    AnalysisNotFound(i64),

    #[error("Query record {0} already has an analysis")]
    AlreadyAnalyzed(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Append-only ledger of query records and their analyses.
///
/// Cloning is cheap (shares the pool), so each capture session can hold its own
/// handle. Appends go straight to the pool; there is no ledger-wide lock.
#[derive(Clone)]
pub struct QueryLedger {
    pool: SqlitePool,
}

impl QueryLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Query records
    // ========================================================================

    pub async fn insert_record(&self, record: &NewQueryRecord) -> Result<QueryRecord, LedgerError> {
        let result = sqlx::query(
            r#"INSERT INTO query_records
               (query, duration, timestamp, is_slow, view_name, url_path, stack_trace,
                query_params_json, request_method, request_content_type, response_status_code)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.query)
        .bind(record.duration)
        .bind(Utc::now())
        .bind(record.is_slow)
        .bind(&record.view_name)
        .bind(&record.url_path)
        .bind(&record.stack_trace)
        .bind(&record.query_params_json)
        .bind(&record.request_method)
        .bind(&record.request_content_type)
        .bind(record.response_status_code)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_record(id).await?.ok_or(LedgerError::RecordNotFound(id))
    }

    pub async fn get_record(&self, id: i64) -> Result<Option<QueryRecord>, LedgerError> {
        sqlx::query_as::<_, QueryRecord>("SELECT * FROM query_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::from)
    }

    /// Delete a record; its analysis goes with it
    pub async fn delete_record(&self, id: i64) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM query_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::RecordNotFound(id));
        }
        Ok(())
    }

    /// Filtered, sorted page of records joined with their analysis id
    pub async fn list_records(
        &self,
        filter: &QueryFilter,
        sort: QuerySort,
        page: PageRequest,
    ) -> Result<Page<QueryRecordView>, LedgerError> {
        let (where_sql, args) = record_where_clause(filter);
        let count_sql = format!(
            "SELECT COUNT(*) FROM query_records r LEFT JOIN query_analyses a ON a.query_record_id = r.id{}",
            where_sql
        );
        let total: i64 = sqlx::query_scalar_with(&count_sql, args)
            .fetch_one(&self.pool)
            .await?;

        let (where_sql, mut args) = record_where_clause(filter);
        let select_sql = format!(
            "SELECT r.*, a.id AS analysis_id FROM query_records r \
             LEFT JOIN query_analyses a ON a.query_record_id = r.id{} \
             ORDER BY {} LIMIT ? OFFSET ?",
            where_sql,
            sort.order_by()
        );
        args.add(page.page_size);
        args.add(page.offset());

        let items = sqlx::query_as_with::<_, QueryRecordView, _>(&select_sql, args)
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(
            "Listed {} of {} query records (page {}, sort {})",
            items.len(),
            total,
            page.page,
            sort.as_str()
        );

        Ok(Page::new(items, total, page))
    }

    /// Total, slow and analyzed counts under a filter
    pub async fn record_stats(&self, filter: &QueryFilter) -> Result<QueryStats, LedgerError> {
        let (where_sql, args) = record_where_clause(filter);
        let sql = format!(
            r#"SELECT
                   COUNT(*) AS total_count,
                   COALESCE(SUM(CASE WHEN r.is_slow THEN 1 ELSE 0 END), 0) AS slow_count,
                   COALESCE(SUM(CASE WHEN a.id IS NOT NULL THEN 1 ELSE 0 END), 0) AS analyzed_count
               FROM query_records r
               LEFT JOIN query_analyses a ON a.query_record_id = r.id{}"#,
            where_sql
        );

        sqlx::query_as_with::<_, QueryStats, _>(&sql, args)
            .fetch_one(&self.pool)
            .await
            .map_err(LedgerError::from)
    }

    /// Distinct non-empty view names, sorted
    pub async fn view_names(&self) -> Result<Vec<String>, LedgerError> {
        sqlx::query_scalar::<_, String>(
            r#"SELECT DISTINCT view_name FROM query_records
               WHERE view_name IS NOT NULL AND view_name != ''
               ORDER BY view_name"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::from)
    }

    /// Records slower than `threshold`, slowest first
    pub async fn slow_queries(&self, threshold: f64) -> Result<Vec<QueryRecord>, LedgerError> {
        sqlx::query_as::<_, QueryRecord>(
            "SELECT * FROM query_records WHERE duration > ? ORDER BY duration DESC",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::from)
    }

    /// Records of one view, slowest first
    pub async fn queries_by_view(&self, view_name: &str) -> Result<Vec<QueryRecord>, LedgerError> {
        sqlx::query_as::<_, QueryRecord>(
            "SELECT * FROM query_records WHERE view_name = ? ORDER BY duration DESC",
        )
        .bind(view_name)
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::from)
    }

    // ========================================================================
    // Query analyses
    // ========================================================================

    /// Store an analysis. The UNIQUE constraint on `query_record_id` turns a
    /// concurrent duplicate into `AlreadyAnalyzed`.
    pub async fn insert_analysis(
        &self,
        analysis: &NewQueryAnalysis,
    ) -> Result<QueryAnalysis, LedgerError> {
        let analysis_json = serde_json::to_string(&analysis.analysis)?;

        let result = sqlx::query(
            r#"INSERT INTO query_analyses
               (query_record_id, analysis_json, suggested_optimization, created_at, applied)
               VALUES (?, ?, ?, ?, FALSE)"#,
        )
        .bind(analysis.query_record_id)
        .bind(&analysis_json)
        .bind(&analysis.suggested_optimization)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                LedgerError::AlreadyAnalyzed(analysis.query_record_id)
            },
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                LedgerError::RecordNotFound(analysis.query_record_id)
            },
            _ => LedgerError::Database(e),
        })?;

        let id = result.last_insert_rowid();
        self.get_analysis(id).await?.ok_or(LedgerError::AnalysisNotFound(id))
    }

    pub async fn get_analysis(&self, id: i64) -> Result<Option<QueryAnalysis>, LedgerError> {
        sqlx::query_as::<_, QueryAnalysis>("SELECT * FROM query_analyses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::from)
    }

    pub async fn get_analysis_for_record(
        &self,
        query_record_id: i64,
    ) -> Result<Option<QueryAnalysis>, LedgerError> {
        sqlx::query_as::<_, QueryAnalysis>("SELECT * FROM query_analyses WHERE query_record_id = ?")
            .bind(query_record_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::from)
    }

    /// Analyses created within `dates`, newest first
    pub async fn list_analyses(
        &self,
        dates: &DateRange,
        page: PageRequest,
    ) -> Result<Page<QueryAnalysis>, LedgerError> {
        let (where_sql, args) = date_where_clause("created_at", dates);
        let count_sql = format!("SELECT COUNT(*) FROM query_analyses{}", where_sql);
        let total: i64 = sqlx::query_scalar_with(&count_sql, args)
            .fetch_one(&self.pool)
            .await?;

        let (where_sql, mut args) = date_where_clause("created_at", dates);
        let select_sql = format!(
            "SELECT * FROM query_analyses{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            where_sql
        );
        args.add(page.page_size);
        args.add(page.offset());

        let items = sqlx::query_as_with::<_, QueryAnalysis, _>(&select_sql, args)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }

    /// Flag analyses as applied; already-applied rows keep their original `applied_at`.
    /// Returns the number of rows that changed.
    pub async fn mark_applied(&self, ids: &[i64]) -> Result<u64, LedgerError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE query_analyses SET applied = TRUE, applied_at = ? \
             WHERE applied = FALSE AND id IN ({})",
            placeholders
        );

        let mut args = SqliteArguments::default();
        args.add(Utc::now());
        for id in ids {
            args.add(*id);
        }

        let result = sqlx::query_with(&sql, args).execute(&self.pool).await?;
        tracing::info!("Marked {} analyses as applied", result.rows_affected());
        Ok(result.rows_affected())
    }
}

// ============================================================================
// WHERE clause builders
// ============================================================================

fn record_where_clause(filter: &QueryFilter) -> (String, SqliteArguments<'static>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut args = SqliteArguments::default();

    if let Some(start) = filter.dates.start() {
        conditions.push("r.timestamp >= ?");
        args.add(start);
    }
    if let Some(end) = filter.dates.end_exclusive() {
        conditions.push("r.timestamp < ?");
        args.add(end);
    }
    match filter.slowness {
        Some(Slowness::Slow) => conditions.push("r.is_slow = TRUE"),
        Some(Slowness::Fast) => conditions.push("r.is_slow = FALSE"),
        None => {},
    }
    match filter.analysis_status {
        Some(AnalysisStatus::Analyzed) => conditions.push("a.id IS NOT NULL"),
        Some(AnalysisStatus::Unanalyzed) => conditions.push("a.id IS NULL"),
        None => {},
    }
    if let Some(view_name) = &filter.view_name {
        conditions.push("LOWER(r.view_name) LIKE ? ESCAPE '\\'");
        args.add(format!("%{}%", escape_like(&view_name.to_lowercase())));
    }
    if let Some(min) = filter.min_duration {
        conditions.push("r.duration >= ?");
        args.add(min);
    }
    if let Some(max) = filter.max_duration {
        conditions.push("r.duration <= ?");
        args.add(max);
    }

    (join_conditions(&conditions), args)
}

fn date_where_clause(column: &str, dates: &DateRange) -> (String, SqliteArguments<'static>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut args = SqliteArguments::default();

    if let Some(start) = dates.start() {
        conditions.push(format!("{} >= ?", column));
        args.add(start);
    }
    if let Some(end) = dates.end_exclusive() {
        conditions.push(format!("{} < ?", column));
        args.add(end);
    }

    let refs: Vec<&str> = conditions.iter().map(String::as_str).collect();
    (join_conditions(&refs), args)
}

fn join_conditions(conditions: &[&str]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
