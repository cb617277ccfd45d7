pub mod error;
pub mod header;
pub mod request;
pub mod types;

pub use error::DomainError;
pub use request::{ConversionRequest, ConvertPayload, DocumentMetadata};
pub use types::OutputFormat;
