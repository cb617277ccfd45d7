use std::{any::Any, panic::AssertUnwindSafe, time::Instant};

use axum::{
    body::Body,
    http::{Extensions, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Version, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{application::error::ErrorReport, infra::telemetry};

use super::error::ApiError;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Turn a panic anywhere below this layer into the standard 500 envelope.
///
/// Working directories held by the panicking handler are removed while the stack unwinds.
pub async fn contain_faults(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let payload = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => return response,
        Err(payload) => payload,
    };

    let trace = telemetry::take_panic_trace();
    let fault = ApiError::unexpected_fault();
    let kind = fault.kind();
    error!(
        target = "presswork::http::fault",
        op = "http::contain_faults",
        error_kind = kind.as_str(),
        guidance = kind.guidance(),
        request_id = request_id.as_str(),
        method = %method,
        path = %path,
        panic = %panic_message(payload.as_ref()),
        location = trace
            .as_ref()
            .and_then(|trace| trace.location.as_deref())
            .unwrap_or("unknown"),
        backtrace = trace.as_ref().map(|trace| trace.backtrace.as_str()).unwrap_or(""),
        span_trace = trace.as_ref().map(|trace| trace.span_trace.as_str()).unwrap_or(""),
        "request handler panicked",
    );

    let mut response = fault.for_request(request_id).into_response();
    // Already logged in full above.
    response.extensions_mut().remove::<ErrorReport>();
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, kind, messages) = match report {
            Some(report) => (report.source, Some(report.kind), report.messages),
            None => ("unknown", None, Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());
        let error_kind = kind.map(|kind| kind.as_str()).unwrap_or("unclassified");
        let guidance = kind.map(|kind| kind.guidance()).unwrap_or("");

        if status.is_server_error() {
            error!(
                target = "presswork::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                error_kind = error_kind,
                guidance = guidance,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "presswork::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                error_kind = error_kind,
                guidance = guidance,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}

/// Compress only textual bodies; EPUB, PDF and Kindle containers are already packed.
pub fn is_text_like(
    _status: StatusCode,
    _version: Version,
    headers: &HeaderMap,
    _extensions: &Extensions,
) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence.starts_with("text/")
        || essence == "application/json"
        || essence == "application/xml"
        || essence.ends_with("+xml")
        || essence.ends_with("+json")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
