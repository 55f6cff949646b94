use std::future::Future;

use super::context::{ResponseStatus, UnitOfWorkContext};
use super::interceptor::{CaptureInterceptor, CaptureOverrides};

/// Capture the queries of a single handler invocation.
///
/// `overrides` adjust the global settings for this call only. The handler's
/// output is returned unchanged.
///
/// ```ignore
/// async fn list_orders(State(state): State<Arc<AppState>>, uri: Uri) -> ApiResult<Json<Vec<Order>>> {
///     let ctx = UnitOfWorkContext::single_handler(RequestInfo::new("GET", &uri.to_string()), "list_orders");
///     let overrides = CaptureOverrides { slow_query_threshold: Some(0.2), ..Default::default() };
///     track_queries(&state.interceptor, &overrides, ctx, load_orders(&state)).await
/// }
/// ```
pub async fn track_queries<F, T>(
    interceptor: &CaptureInterceptor,
    overrides: &CaptureOverrides,
    ctx: UnitOfWorkContext,
    work: F,
) -> T
where
    F: Future<Output = T>,
    T: ResponseStatus,
{
    if *overrides == CaptureOverrides::default() {
        return interceptor.instrument(ctx, work).await;
    }
    interceptor.with_overrides(overrides).instrument(ctx, work).await
}
