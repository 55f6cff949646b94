use axum::{Json, http::StatusCode};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::services::capture::{
    CaptureOverrides, QueryLog, RequestInfo, UnitKind, UnitOfWorkContext, record_query,
    track_queries,
};
use crate::tests::common::{all_records, create_test_db, test_interceptor, test_settings};
use crate::utils::{ApiError, ApiResult};

const INVOICE_SQL: &str = "SELECT * FROM billing_invoice WHERE id = 3";

fn handler_context(uri: &str) -> UnitOfWorkContext {
    UnitOfWorkContext::single_handler(RequestInfo::new("POST", uri), "InvoiceDetailView")
}

async fn invoice_handler() -> ApiResult<Json<&'static str>> {
    record_query(INVOICE_SQL, Duration::from_millis(300));
    Ok(Json("invoice"))
}

async fn missing_invoice() -> ApiResult<Json<&'static str>> {
    record_query(INVOICE_SQL, Duration::from_millis(20));
    Err(ApiError::not_found("Invoice 3 not found"))
}

async fn crashing_handler() -> StatusCode {
    record_query(INVOICE_SQL, Duration::from_millis(40));
    panic!("handler crashed")
}

#[tokio::test]
async fn test_handler_capture_uses_handler_name() {
    let pool = create_test_db().await;
    let interceptor = test_interceptor(&pool, test_settings());
    let ctx = handler_context("/invoices/3?format=pdf");
    assert_eq!(ctx.kind, UnitKind::SingleHandler);

    let output =
        track_queries(&interceptor, &CaptureOverrides::default(), ctx, invoice_handler()).await;

    assert_eq!(output.unwrap().0, "invoice");
    let records = all_records(&pool).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].view_name.as_deref(), Some("InvoiceDetailView"));
    assert_eq!(records[0].url_path.as_deref(), Some("/invoices/3"));
    assert_eq!(records[0].request_method.as_deref(), Some("POST"));
    assert_eq!(records[0].response_status_code, Some(200));
    assert_eq!(records[0].query_params()["format"], vec!["pdf"]);
    assert!(!records[0].is_slow);
}

#[tokio::test]
async fn test_overrides_apply_to_single_call() {
    let pool = create_test_db().await;
    let interceptor = test_interceptor(&pool, test_settings());
    let overrides = CaptureOverrides {
        slow_query_threshold: Some(0.1),
        capture_params: Some(false),
        ..Default::default()
    };

    let _ = track_queries(&interceptor, &overrides, handler_context("/invoices/3?x=1"), invoice_handler())
        .await;
    let _ = track_queries(
        &interceptor,
        &CaptureOverrides::default(),
        handler_context("/invoices/3?x=1"),
        invoice_handler(),
    )
    .await;

    let records = all_records(&pool).await;
    assert_eq!(records.len(), 2);
    assert!(records[0].is_slow, "0.3s is slow against the 0.1s override");
    assert!(records[0].query_params().is_empty());
    assert!(!records[1].is_slow, "global 0.5s threshold is back for the next call");
    assert_eq!(records[1].query_params()["x"], vec!["1"]);
    assert_eq!(interceptor.settings().slow_query_threshold, 0.5);
}

#[tokio::test]
async fn test_disabled_override_skips_capture() {
    let pool = create_test_db().await;
    let interceptor = test_interceptor(&pool, test_settings());
    let overrides = CaptureOverrides { enabled: Some(false), ..Default::default() };

    let output = track_queries(&interceptor, &overrides, handler_context("/invoices/3"), invoice_handler())
        .await;

    assert!(output.is_ok());
    assert!(all_records(&pool).await.is_empty());
}

#[tokio::test]
async fn test_error_status_is_recorded() {
    let pool = create_test_db().await;
    let interceptor = test_interceptor(&pool, test_settings());

    let output = track_queries(
        &interceptor,
        &CaptureOverrides::default(),
        handler_context("/invoices/3"),
        missing_invoice(),
    )
    .await;

    assert!(matches!(output, Err(ApiError::ResourceNotFound(_))));
    let records = all_records(&pool).await;
    assert_eq!(records[0].response_status_code, Some(404));
}

#[tokio::test]
async fn test_panicking_handler_is_captured_and_panic_resumed() {
    let pool = create_test_db().await;
    let interceptor = test_interceptor(&pool, test_settings());

    let result = AssertUnwindSafe(track_queries(
        &interceptor,
        &CaptureOverrides::default(),
        handler_context("/invoices/3"),
        crashing_handler(),
    ))
    .catch_unwind()
    .await;

    assert!(result.is_err(), "panic must propagate to the caller");
    let records = all_records(&pool).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].query, INVOICE_SQL);
    assert_eq!(records[0].response_status_code, Some(500));
}

#[tokio::test]
async fn test_invalid_duration_is_skipped() {
    let pool = create_test_db().await;
    let interceptor = test_interceptor(&pool, test_settings());
    let ctx = handler_context("/invoices/3");

    // Own scope so statements from other tests never reach this session
    let outcome = QueryLog::new()
        .scope(async {
            let token = interceptor.begin_capture();
            let log = QueryLog::current();
            log.record_raw("SELECT * FROM billing_invoice", "n/a");
            log.record_raw("SELECT * FROM billing_invoice WHERE id = 1", "-0.2");
            log.record_raw("SELECT * FROM billing_invoice WHERE id = 2", "0.750");
            interceptor.complete(token, &ctx).await
        })
        .await;

    assert_eq!(outcome.written, 1);
    assert_eq!(outcome.failures.len(), 2);
    let records = all_records(&pool).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].duration, 0.75);
    assert!(records[0].is_slow);
}

#[tokio::test]
async fn test_scoped_log_is_reused_by_nested_capture() {
    let pool = create_test_db().await;
    let interceptor = test_interceptor(&pool, test_settings());
    let outer = QueryLog::new();

    let output = outer
        .clone()
        .scope(track_queries(
            &interceptor,
            &CaptureOverrides::default(),
            handler_context("/invoices/3"),
            invoice_handler(),
        ))
        .await;

    assert_eq!(output.unwrap().0, "invoice");

    assert_eq!(outer.len(), 1, "handler queries land in the enclosing log");
    assert_eq!(all_records(&pool).await.len(), 1);
}
