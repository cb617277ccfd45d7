mod cors;
mod error;
mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use tower_http::compression::{CompressionLayer, Predicate, predicate::SizeAbove};

pub use cors::{OriginPattern, OriginPolicy};
pub use error::{ApiError, ErrorEnvelope};
pub use handlers::{EndpointInfo, endpoints};
pub use middleware::{
    REQUEST_ID_HEADER, RequestContext, contain_faults, log_responses, set_request_context,
};

use crate::{application::convert::Converter, config::CorsSettings};

use super::error::InfraError;

const COMPRESSION_MIN_BYTES: u16 = 256;
/// Room for JSON escaping and metadata around the document itself.
const BODY_OVERHEAD_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct HttpState {
    pub converter: Arc<Converter>,
}

impl HttpState {
    pub fn new(converter: Converter) -> Self {
        Self {
            converter: Arc::new(converter),
        }
    }
}

/// Assemble the service router.
///
/// Layers, outermost first: request id, fault containment, response logging, CORS,
/// compression, body limit.
pub fn build_router(state: HttpState, cors: &CorsSettings) -> Result<Router, InfraError> {
    let cors = OriginPolicy::parse(&cors.allow_origin)?.layer();
    let body_limit = state
        .converter
        .max_content_bytes()
        .saturating_mul(2)
        .saturating_add(BODY_OVERHEAD_BYTES);
    let compression = CompressionLayer::new()
        .compress_when(SizeAbove::new(COMPRESSION_MIN_BYTES).and(middleware::is_text_like));

    let router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api", get(handlers::api_catalog))
        .route("/convert/{format}", post(handlers::convert))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(compression)
        .layer(cors)
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::contain_faults))
        .layer(from_fn(middleware::set_request_context));

    Ok(router)
}
