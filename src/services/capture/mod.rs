//! Query capture
//!
//! - `query_log`: the log host code records executed statements into
//! - `context`: explicit description of the captured unit of work
//! - `interceptor`: begin / end / persist contract shared by both entry points
//! - `tracked`: per-handler wrapper with call-site overrides
//!
//! The whole-request entry point lives in `crate::middleware::query_capture`.

pub mod context;
pub mod interceptor;
pub mod query_log;
pub mod tracked;

pub use context::{RequestInfo, ResponseStatus, UnitKind, UnitOfWorkContext, parse_query_params};
pub use interceptor::{
    BUILTIN_EXCLUDED_PATHS, CaptureError, CaptureInterceptor, CaptureOutcome, CaptureOverrides,
    CaptureSettings, CaptureToken, CapturedBatch, CapturedQuery,
};
pub use query_log::{CaptureSession, DEFAULT_LOG_CAPACITY, ExecutedQuery, QueryLog, record_query};
pub use tracked::track_queries;
