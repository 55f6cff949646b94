pub mod query_capture;

pub use query_capture::query_capture_middleware;
