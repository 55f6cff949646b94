//! Explicit description of the unit of work being captured.

use axum::{
    extract::{MatchedPath, Request},
    http::{StatusCode, header},
    response::Response,
};
use std::collections::BTreeMap;

use crate::models::QueryParams;
use crate::utils::{ApiError, StringExt};

/// What a capture session wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// The whole request, via the capture middleware
    WholeRequest,
    /// One handler invocation, via [`track_queries`](super::track_queries)
    SingleHandler,
}

/// Request attributes copied onto each captured query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: Option<String>,
    /// Path without the query string
    pub path: String,
    pub query_params: QueryParams,
    pub content_type: Option<String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, uri: &str) -> Self {
        let (path, query) = split_uri(uri);
        Self {
            method: Some(method.into()),
            path: path.to_string(),
            query_params: query.map(parse_query_params).unwrap_or_default(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Into::<String>::into(content_type).clean();
        self
    }

    pub fn from_request(req: &Request) -> Self {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.clean());

        Self {
            method: Some(req.method().to_string()),
            path: req.uri().path().to_string(),
            query_params: req.uri().query().map(parse_query_params).unwrap_or_default(),
            content_type,
        }
    }
}

/// The unit of work a capture session is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWorkContext {
    pub kind: UnitKind,
    pub request: RequestInfo,
    /// Name from routing metadata (the matched route)
    pub route_name: Option<String>,
    /// Name of the wrapping handler
    pub handler_name: Option<String>,
    /// Status produced by the unit of work, once known
    pub status_code: Option<u16>,
}

impl UnitOfWorkContext {
    pub fn whole_request(req: &Request) -> Self {
        Self {
            kind: UnitKind::WholeRequest,
            request: RequestInfo::from_request(req),
            route_name: req.extensions().get::<MatchedPath>().map(|p| p.as_str().to_string()),
            handler_name: None,
            status_code: None,
        }
    }

    pub fn single_handler(request: RequestInfo, handler_name: impl Into<String>) -> Self {
        Self {
            kind: UnitKind::SingleHandler,
            request,
            route_name: None,
            handler_name: Into::<String>::into(handler_name).clean(),
            status_code: None,
        }
    }

    pub fn with_route_name(mut self, route_name: impl Into<String>) -> Self {
        self.route_name = Into::<String>::into(route_name).clean();
        self
    }

    pub fn with_status(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    /// Routing name first, then handler name, else empty
    pub fn view_name(&self) -> String {
        self.route_name.clean().or_else(|| self.handler_name.clean()).unwrap_or_default()
    }

    /// Status to record; units that report none count as 200
    pub fn effective_status(&self) -> u16 {
        self.status_code.unwrap_or(200)
    }
}

fn split_uri(uri: &str) -> (&str, Option<&str>) {
    let without_fragment = uri.split('#').next().unwrap_or(uri);
    match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    }
}

/// Decode `a=1&a=2&b` into `{a: [1, 2], b: [""]}`
pub fn parse_query_params(query: &str) -> QueryParams {
    let mut params: QueryParams = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.entry(decode_component(key)).or_default().push(decode_component(value));
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

// ============================================================================
// Response status of a unit of work
// ============================================================================

/// Status code reported by a unit of work's output, if it has one
pub trait ResponseStatus {
    fn status_code(&self) -> Option<u16>;
}

impl ResponseStatus for Response {
    fn status_code(&self) -> Option<u16> {
        Some(self.status().as_u16())
    }
}

impl ResponseStatus for StatusCode {
    fn status_code(&self) -> Option<u16> {
        Some(self.as_u16())
    }
}

impl<T> ResponseStatus for (StatusCode, T) {
    fn status_code(&self) -> Option<u16> {
        Some(self.0.as_u16())
    }
}

impl<T> ResponseStatus for axum::Json<T> {
    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl ResponseStatus for ApiError {
    fn status_code(&self) -> Option<u16> {
        Some(ApiError::status_code(self).as_u16())
    }
}

impl ResponseStatus for () {
    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl<T: ResponseStatus, E: ResponseStatus> ResponseStatus for Result<T, E> {
    fn status_code(&self) -> Option<u16> {
        match self {
            Ok(v) => v.status_code(),
            Err(e) => e.status_code(),
        }
    }
}
