use std::borrow::Cow;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{
    application::{
        convert::ConvertError,
        error::{ErrorKind, ErrorReport},
    },
    domain::DomainError,
    util::bytes::human_size,
};

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub request_id: String,
    pub timestamp: String,
}

#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    status: StatusCode,
    error: Cow<'static, str>,
    message: String,
    source: &'static str,
    diagnostics: Vec<String>,
    request_id: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, error: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            status: kind.status(),
            error: Cow::Borrowed(error),
            diagnostics: vec![message.clone()],
            message,
            source: "infra::http",
            request_id: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, "Not found", message).with_status(StatusCode::NOT_FOUND)
    }

    pub fn unexpected_fault() -> Self {
        Self::new(
            ErrorKind::UnexpectedFault,
            "Internal server error",
            "An unexpected fault occurred while handling the request",
        )
        .with_source("infra::http::middleware::contain_faults")
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_source(mut self, source: &'static str) -> Self {
        self.source = source;
        self
    }

    /// Record the full error chain for the logging middleware.
    pub fn with_diagnostics(mut self, error: &dyn std::error::Error) -> Self {
        self.diagnostics = ErrorReport::from_error(self.source, self.kind, error).messages;
        self
    }

    pub fn for_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<&DomainError> for ApiError {
    fn from(error: &DomainError) -> Self {
        let api = match error {
            DomainError::MissingContent => Self::new(
                ErrorKind::InvalidRequest,
                "Missing content",
                "Request body must include non-empty `content`",
            ),
            DomainError::ContentTooLarge { size, limit } => Self::new(
                ErrorKind::ContentTooLarge,
                "Content too large",
                format!(
                    "Document is {}; the limit is {}",
                    human_size(*size as u64),
                    human_size(*limit as u64)
                ),
            ),
            DomainError::UnsupportedFormat { format } => Self::not_found(format!(
                "Unsupported output format `{format}`"
            )),
            DomainError::Validation { message } => {
                Self::new(ErrorKind::ValidationFailed, "Validation failed", message.clone())
            }
        };
        api.with_source("domain::request").with_diagnostics(error)
    }
}

impl From<&ConvertError> for ApiError {
    fn from(error: &ConvertError) -> Self {
        let kind = error.kind();
        let label = match kind {
            ErrorKind::ConversionTimeout => "Conversion timed out",
            ErrorKind::FileOperationError => "File operation failed",
            ErrorKind::InitializationError => "Service degraded",
            _ => "Conversion failed",
        };
        // Encoding faults here come from generated output, not from the caller.
        let status = match kind {
            ErrorKind::EncodingError => StatusCode::INTERNAL_SERVER_ERROR,
            other => other.status(),
        };
        Self::new(kind, label, error.public_message())
            .with_status(status)
            .with_source("application::convert")
            .with_diagnostics(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: self.error.into_owned(),
            message: self.message,
            request_id: self.request_id.unwrap_or_default(),
            timestamp: now_rfc3339(),
        };
        let mut response = (self.status, Json(body)).into_response();
        // Attach a structured report so shared logging middleware can emit rich diagnostics.
        ErrorReport {
            source: self.source,
            kind: self.kind,
            messages: self.diagnostics,
        }
        .attach(&mut response);
        response
    }
}

pub(crate) fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
