use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("missing document content")]
    MissingContent,
    #[error("document content is {size} bytes; the limit is {limit} bytes")]
    ContentTooLarge { size: usize, limit: usize },
    #[error("unsupported output format `{format}`")]
    UnsupportedFormat { format: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
