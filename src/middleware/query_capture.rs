use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::services::capture::{CaptureInterceptor, UnitOfWorkContext};

/// Whole-request query capture.
///
/// Mount with `Router::layer` so the matched route is known and used as the
/// view name. The response passes through untouched.
pub async fn query_capture_middleware(
    State(interceptor): State<CaptureInterceptor>,
    req: Request,
    next: Next,
) -> Response {
    let ctx = UnitOfWorkContext::whole_request(&req);
    if !interceptor.should_capture(&ctx) {
        tracing::trace!("Query capture skipped for {}", ctx.request.path);
        return next.run(req).await;
    }

    interceptor.instrument(ctx, next.run(req)).await
}
