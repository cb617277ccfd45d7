use std::{error::Error as StdError, fmt};

use axum::{http::StatusCode, response::Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::{config::LoadError, domain::error::DomainError, infra::error::InfraError};

/// Fixed vocabulary of failure categories shared by logs and HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    ContentTooLarge,
    ValidationFailed,
    ConversionTimeout,
    ConversionFailed,
    FileOperationError,
    EncodingError,
    InitializationError,
    UnexpectedFault,
    ShutdownError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ContentTooLarge => "content_too_large",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::ConversionTimeout => "conversion_timeout",
            ErrorKind::ConversionFailed => "conversion_failed",
            ErrorKind::FileOperationError => "file_operation_error",
            ErrorKind::EncodingError => "encoding_error",
            ErrorKind::InitializationError => "initialization_error",
            ErrorKind::UnexpectedFault => "unexpected_fault",
            ErrorKind::ShutdownError => "shutdown_error",
        }
    }

    /// Operator-facing remediation text.
    pub fn guidance(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => {
                "Check that the request body is valid JSON and the route names a supported format."
            }
            ErrorKind::ContentTooLarge => {
                "Split the document or raise conversion.max_content_bytes."
            }
            ErrorKind::ValidationFailed => {
                "Review the document structure and metadata fields for malformed values."
            }
            ErrorKind::ConversionTimeout => {
                "Simplify the document, reduce remote images, or raise conversion.timeout_seconds."
            }
            ErrorKind::ConversionFailed => {
                "Inspect the renderer diagnostics and verify the renderer and its extensions are installed."
            }
            ErrorKind::FileOperationError => {
                "Verify conversion.temp_dir exists, is writable, and has free space."
            }
            ErrorKind::EncodingError => "Ensure the document and generated files are valid UTF-8.",
            ErrorKind::InitializationError => {
                "Install the renderer or set renderer.search_paths / renderer.gemfile, then restart."
            }
            ErrorKind::UnexpectedFault => {
                "Report the request id and the logged backtrace to the maintainers."
            }
            ErrorKind::ShutdownError => {
                "Raise server.graceful_shutdown_seconds if in-flight conversions are being cut off."
            }
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest | ErrorKind::ValidationFailed | ErrorKind::EncodingError => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::ContentTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::ConversionTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ConversionFailed
            | ErrorKind::FileOperationError
            | ErrorKind::InitializationError
            | ErrorKind::UnexpectedFault
            | ErrorKind::ShutdownError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error descriptor emitted alongside error-bearing log entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    pub guidance: &'static str,
    pub component: &'static str,
    pub operation: &'static str,
}

impl ErrorDetail {
    pub fn new(
        kind: ErrorKind,
        component: &'static str,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            guidance: kind.guidance(),
            component,
            operation,
        }
    }

    /// Write the descriptor to the log. Client-caused kinds are warnings.
    pub fn emit(&self, request_id: Option<&str>) {
        if self.kind.status().is_client_error() {
            warn!(
                target = "presswork::error",
                error_kind = self.kind.as_str(),
                component = self.component,
                op = self.operation,
                guidance = self.guidance,
                request_id = request_id.unwrap_or(""),
                "{}",
                self.message
            );
        } else {
            error!(
                target = "presswork::error",
                error_kind = self.kind.as_str(),
                component = self.component,
                op = self.operation,
                guidance = self.guidance,
                request_id = request_id.unwrap_or(""),
                "{}",
                self.message
            );
        }
    }
}

/// Diagnostic chain carried on an error response for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub kind: ErrorKind,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, kind: ErrorKind, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            kind,
            messages,
        }
    }

    pub fn from_message(source: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Process-level failures surfaced by the binary entry point.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("shutdown failed: {0}")]
    Shutdown(String),
}

impl AppError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Domain(err) => err.kind(),
            AppError::Infra(InfraError::Io(_)) => ErrorKind::FileOperationError,
            AppError::Infra(_) | AppError::Config(_) | AppError::Initialization(_) => {
                ErrorKind::InitializationError
            }
            AppError::Shutdown(_) => ErrorKind::ShutdownError,
        }
    }
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::MissingContent | DomainError::UnsupportedFormat { .. } => {
                ErrorKind::InvalidRequest
            }
            DomainError::ContentTooLarge { .. } => ErrorKind::ContentTooLarge,
            DomainError::Validation { .. } => ErrorKind::ValidationFailed,
        }
    }
}
