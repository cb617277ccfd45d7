use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State, rejection::BytesRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{Instrument, debug, info_span};

use crate::{
    application::error::ErrorKind,
    domain::{ConversionRequest, ConvertPayload, DomainError, OutputFormat},
    util::filename::{attachment_filename, content_disposition},
};

use super::{
    HttpState,
    error::{ApiError, now_rfc3339},
    middleware::RequestContext,
};

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EndpointInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<&'static str>,
}

/// Routes served by this process, in catalog order.
pub fn endpoints() -> Vec<EndpointInfo> {
    let mut endpoints = vec![
        EndpointInfo {
            method: "GET",
            path: "/healthz",
            description: "Service health and external tool readiness",
            content_type: Some("application/json"),
        },
        EndpointInfo {
            method: "GET",
            path: "/api",
            description: "This endpoint catalog",
            content_type: Some("application/json"),
        },
    ];
    endpoints.extend(OutputFormat::ALL.iter().map(|format| EndpointInfo {
        method: "POST",
        path: convert_path(*format),
        description: convert_description(*format),
        content_type: Some(format.content_type()),
    }));
    endpoints
}

fn convert_path(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Epub => "/convert/epub",
        OutputFormat::Pdf => "/convert/pdf",
        OutputFormat::Html5 => "/convert/html5",
        OutputFormat::Mobi => "/convert/mobi",
        OutputFormat::Azw3 => "/convert/azw3",
        OutputFormat::Docbook5 => "/convert/docbook5",
    }
}

fn convert_description(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Epub => "Convert AsciiDoc to EPUB 3",
        OutputFormat::Pdf => "Convert AsciiDoc to PDF",
        OutputFormat::Html5 => "Convert AsciiDoc to standalone HTML5 with embedded images",
        OutputFormat::Mobi => "Convert AsciiDoc to MOBI through an intermediate EPUB",
        OutputFormat::Azw3 => "Convert AsciiDoc to AZW3 through an intermediate EPUB",
        OutputFormat::Docbook5 => "Convert AsciiDoc to DocBook 5 XML",
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub endpoints: Vec<&'static str>,
    pub renderer_ready: bool,
    pub ebook_converter_ready: bool,
    pub timestamp: String,
}

pub(super) async fn healthz(State(state): State<HttpState>) -> Response {
    let renderer_ready = state.converter.is_ready();
    let (status, label) = if renderer_ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        name: SERVICE_NAME,
        version: SERVICE_VERSION,
        status: label,
        endpoints: endpoints().iter().map(|endpoint| endpoint.path).collect(),
        renderer_ready,
        ebook_converter_ready: state.converter.ebook_converter_ready(),
        timestamp: now_rfc3339(),
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<EndpointInfo>,
}

pub(super) async fn api_catalog() -> Json<CatalogResponse> {
    Json(CatalogResponse {
        name: SERVICE_NAME,
        version: SERVICE_VERSION,
        endpoints: endpoints(),
    })
}

pub(super) async fn convert(
    State(state): State<HttpState>,
    Path(format): Path<String>,
    context: Option<Extension<RequestContext>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = context
        .map(|Extension(ctx)| ctx.request_id)
        .unwrap_or_default();

    match convert_inner(&state, &format, &request_id, body).await {
        Ok(response) => response,
        Err(error) => error.for_request(request_id).into_response(),
    }
}

async fn convert_inner(
    state: &HttpState,
    format: &str,
    request_id: &str,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let format: OutputFormat = format.parse().map_err(|err: DomainError| ApiError::from(&err))?;
    transition("received", format, request_id);

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::new(
                ErrorKind::ContentTooLarge,
                "Content too large",
                "Request body exceeds the configured size ceiling",
            )
        } else {
            ApiError::new(ErrorKind::InvalidRequest, "Invalid request", rejection.body_text())
        }
    })?;

    let payload = parse_payload(&body)?;
    let request = ConversionRequest::from_payload(payload, state.converter.max_content_bytes())
        .map_err(|err| ApiError::from(&err))?;
    transition("validated", format, request_id);

    let span = info_span!(
        "conversion",
        request_id = request_id,
        format = format.as_str(),
        content_bytes = request.content.len()
    );
    let result = state
        .converter
        .convert(&request, format)
        .instrument(span)
        .await
        .map_err(|err| ApiError::from(&err))?;

    let filename = attachment_filename(request.metadata.display_title(), format.extension());
    let content_type = result.content_type;
    let bytes = result
        .into_bytes()
        .await
        .map_err(|err| ApiError::from(&err))?;

    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn parse_payload(body: &[u8]) -> Result<ConvertPayload, ApiError> {
    let text = std::str::from_utf8(body).map_err(|err| {
        ApiError::new(
            ErrorKind::EncodingError,
            "Invalid encoding",
            "Request body must be UTF-8 encoded JSON",
        )
        .with_diagnostics(&err)
    })?;

    // An empty body carries no content, same as `{}`.
    if text.trim().is_empty() {
        return Ok(ConvertPayload::default());
    }

    serde_json::from_str(text).map_err(|err| {
        ApiError::new(
            ErrorKind::InvalidRequest,
            "Invalid request",
            format!("Request body is not a valid conversion payload: {err}"),
        )
    })
}

fn transition(state: &'static str, format: OutputFormat, request_id: &str) {
    debug!(
        target = "presswork::http::convert",
        op = "convert::transition",
        state,
        format = format.as_str(),
        request_id,
        "Conversion state changed"
    );
}

pub(super) async fn not_found(context: Option<Extension<RequestContext>>) -> ApiError {
    let error = ApiError::not_found("No route matches this path");
    match context {
        Some(Extension(ctx)) => error.for_request(ctx.request_id),
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_every_format() {
        let paths: Vec<_> = endpoints().iter().map(|endpoint| endpoint.path).collect();
        assert!(paths.contains(&"/healthz"));
        assert!(paths.contains(&"/api"));
        for format in OutputFormat::ALL {
            assert!(paths.contains(&format!("/convert/{}", format.as_str()).as_str()));
        }
    }

    #[test]
    fn empty_body_means_missing_content() {
        let payload = parse_payload(b"  ").expect("empty body parses");
        assert!(payload.content.is_none());
    }

    #[test]
    fn non_utf8_body_is_an_encoding_error() {
        let err = parse_payload(&[0xff, 0xfe, b'{']).expect_err("invalid utf8");
        assert_eq!(err.kind(), ErrorKind::EncodingError);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn malformed_json_is_invalid_request() {
        let err = parse_payload(br#"{"content": 3"#).expect_err("bad json");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
