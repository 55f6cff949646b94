pub mod query_analysis;
pub mod query_filter;
pub mod query_record;

pub use query_analysis::*;
pub use query_filter::*;
pub use query_record::*;
