//! Append-only log of executed database queries.
//!
//! Host code records every statement it runs (usually through [`QueryLog::timed`]
//! or [`record_query`]). Capture sessions remember the log position when they open
//! and later read back only what was appended since.
//!
//! Each unit of work can run inside its own log via [`QueryLog::scope`]; outside a
//! scope statements go to a process-wide log.

use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

static PROCESS_LOG: Lazy<QueryLog> = Lazy::new(QueryLog::new);

tokio::task_local! {
    static CURRENT_LOG: QueryLog;
}

/// One executed statement, duration as text in seconds (`"0.012"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedQuery {
    pub sql: String,
    pub time: String,
}

struct LogInner {
    entries: VecDeque<ExecutedQuery>,
    /// Position of `entries[0]`; grows as old entries are dropped
    first_position: u64,
    capacity: usize,
}

impl LogInner {
    fn end_position(&self) -> u64 {
        self.first_position + self.entries.len() as u64
    }
}

/// Cloneable handle to a bounded, append-only query log.
///
/// Positions are monotonic: dropping old entries never renumbers the rest.
#[derive(Clone)]
pub struct QueryLog {
    inner: Arc<Mutex<LogInner>>,
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                entries: VecDeque::new(),
                first_position: 0,
                capacity: capacity.max(1),
            })),
        }
    }

    /// The process-wide log used outside any scope
    pub fn process() -> QueryLog {
        PROCESS_LOG.clone()
    }

    /// Log of the enclosing scope, if any
    pub fn scoped() -> Option<QueryLog> {
        CURRENT_LOG.try_with(|log| log.clone()).ok()
    }

    /// Scoped log, falling back to the process-wide one
    pub fn current() -> QueryLog {
        Self::scoped().unwrap_or_else(Self::process)
    }

    /// Run `fut` with this log as the current one
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_LOG.scope(self, fut).await
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        // A panic while holding the lock cannot leave the deque half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a statement with its measured duration
    pub fn record(&self, sql: impl Into<String>, elapsed: Duration) {
        self.record_raw(sql, format!("{:.3}", elapsed.as_secs_f64()));
    }

    /// Record a statement with a driver-reported duration text
    pub fn record_raw(&self, sql: impl Into<String>, time: impl Into<String>) {
        let mut inner = self.lock();
        inner.entries.push_back(ExecutedQuery { sql: sql.into(), time: time.into() });
        while inner.entries.len() > inner.capacity {
            inner.entries.pop_front();
            inner.first_position += 1;
        }
    }

    /// Await a database future and record how long it took
    pub async fn timed<F: Future>(&self, sql: &str, fut: F) -> F::Output {
        let start = Instant::now();
        let output = fut.await;
        self.record(sql, start.elapsed());
        output
    }

    /// Position one past the newest entry (total ever recorded)
    pub fn len(&self) -> u64 {
        self.lock().end_position()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries recorded at or after `position`.
    ///
    /// When part of that range has already been dropped, only the retained tail
    /// is returned.
    pub fn since(&self, position: u64) -> Vec<ExecutedQuery> {
        let inner = self.lock();
        if position < inner.first_position {
            tracing::warn!(
                "Query log dropped {} entries before capture could read them",
                inner.first_position - position
            );
        }
        let skip = position.saturating_sub(inner.first_position) as usize;
        inner.entries.iter().skip(skip).cloned().collect()
    }

    /// Snapshot the current position for later diffing
    pub fn open_capture_session(&self) -> CaptureSession {
        CaptureSession { log: self.clone(), baseline: self.len() }
    }
}

/// Record into the current log (scoped, else process-wide)
pub fn record_query(sql: impl Into<String>, elapsed: Duration) {
    QueryLog::current().record(sql, elapsed);
}

/// A baseline position in a query log
#[derive(Clone)]
pub struct CaptureSession {
    log: QueryLog,
    baseline: u64,
}

impl CaptureSession {
    pub fn baseline(&self) -> u64 {
        self.baseline
    }

    /// Statements recorded since the session opened
    pub fn queries_since_open(&self) -> Vec<ExecutedQuery> {
        self.log.since(self.baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_sees_only_new_queries() {
        let log = QueryLog::new();
        log.record_raw("SELECT 1", "0.001");

        let session = log.open_capture_session();
        assert_eq!(session.baseline(), 1);
        assert!(session.queries_since_open().is_empty());

        log.record_raw("SELECT 2", "0.002");
        log.record("SELECT 3", Duration::from_millis(1500));

        let delta = session.queries_since_open();
        assert_eq!(delta.len(), 2);
        assert_eq!(delta[0].sql, "SELECT 2");
        assert_eq!(delta[1].time, "1.500");
    }

    #[test]
    fn test_capacity_keeps_positions_monotonic() {
        let log = QueryLog::with_capacity(2);
        let session = log.open_capture_session();
        for i in 0..5 {
            log.record_raw(format!("SELECT {}", i), "0.0");
        }

        assert_eq!(log.len(), 5);
        let delta = session.queries_since_open();
        assert_eq!(delta.len(), 2);
        assert_eq!(delta[0].sql, "SELECT 3");
        assert_eq!(log.since(4).len(), 1);
        assert!(log.since(5).is_empty());
    }

    #[tokio::test]
    async fn test_scope_isolates_concurrent_units() {
        let a = QueryLog::new();
        let b = QueryLog::new();

        let task_a = a.clone().scope(async {
            record_query("SELECT * FROM orders", Duration::from_millis(1));
            tokio::task::yield_now().await;
            record_query("SELECT * FROM order_items", Duration::from_millis(1));
        });
        let task_b = b.clone().scope(async {
            record_query("SELECT * FROM sessions", Duration::from_millis(1));
        });
        tokio::join!(task_a, task_b);

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert_eq!(b.since(0)[0].sql, "SELECT * FROM sessions");
    }

    #[tokio::test]
    async fn test_timed_records_elapsed() {
        let log = QueryLog::new();
        let value = log.timed("SELECT 42", async { 42 }).await;

        assert_eq!(value, 42);
        let entries = log.since(0);
        assert_eq!(entries[0].sql, "SELECT 42");
        assert!(entries[0].time.parse::<f64>().is_ok());
    }
}
