use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::application::{error::ErrorKind, images::ImageError};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("renderer is not available; the service is running degraded")]
    RendererUnavailable,
    #[error("e-book converter is not available for Kindle formats")]
    EbookConverterUnavailable,
    #[error("conversion exceeded the {}s deadline", .limit.as_secs())]
    Timeout { limit: Duration },
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{stage} process exited with {status}: {stderr}")]
    Process {
        stage: &'static str,
        status: String,
        stderr: String,
    },
    #[error("{stage} did not produce {}", .path.display())]
    MissingOutput { stage: &'static str, path: PathBuf },
    #[error("{stage} produced an empty artifact")]
    EmptyOutput { stage: &'static str },
    #[error("file operation `{operation}` failed for {}: {source}", .path.display())]
    FileOperation {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Images(#[from] ImageError),
}

impl ConvertError {
    pub(crate) fn file(
        operation: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::FileOperation {
            operation,
            path,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::Timeout { .. } => ErrorKind::ConversionTimeout,
            ConvertError::FileOperation { .. } => ErrorKind::FileOperationError,
            ConvertError::RendererUnavailable | ConvertError::EbookConverterUnavailable => {
                ErrorKind::InitializationError
            }
            ConvertError::Images(err) => err.kind(),
            ConvertError::Spawn { .. }
            | ConvertError::Process { .. }
            | ConvertError::MissingOutput { .. }
            | ConvertError::EmptyOutput { .. } => ErrorKind::ConversionFailed,
        }
    }

    /// Message safe to hand back to the caller.
    pub fn public_message(&self) -> String {
        match self {
            ConvertError::Timeout { limit } => {
                format!("Conversion timed out after {} seconds", limit.as_secs())
            }
            ConvertError::RendererUnavailable => {
                "Document renderer is not available".to_string()
            }
            ConvertError::EbookConverterUnavailable => {
                "E-book converter is not available".to_string()
            }
            ConvertError::FileOperation { .. } => {
                "Failed to prepare conversion files".to_string()
            }
            _ => "Conversion failed".to_string(),
        }
    }
}
