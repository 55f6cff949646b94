// Test modules

pub mod common;
mod track_queries_test;
