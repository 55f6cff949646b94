pub mod capture;
pub mod llm;
pub mod query_ledger;

pub use capture::{
    CaptureError, CaptureInterceptor, CaptureOverrides, CaptureSettings, QueryLog,
    UnitOfWorkContext, record_query, track_queries,
};
pub use llm::{AnalysisOutcome, AnalysisProvider, ProviderError, ProviderKind, QueryAnalyzer};
pub use query_ledger::{LedgerError, QueryLedger};
