pub mod query_analysis;
pub mod query_record;
