mod http;
mod identity;

pub use http::HttpTransport;
pub use identity::{TransportRegistry, TransportToken};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Header name/value pairs, in the order they were given. Names may repeat.
pub type Headers = Vec<(String, String)>;

#[derive(Debug, Clone)]
pub struct UnaryRequest {
    pub service: String,
    pub method: String,
    pub signal: CancellationToken,
    pub timeout: Option<Duration>,
    pub headers: Headers,
    pub message: Value,
}

#[derive(Debug, Clone)]
pub struct UnaryResponse {
    pub message: Value,
    pub headers: Headers,
    pub trailers: Headers,
}

/// Performs calls against one backend. Implementations own wire encoding and default headers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn unary(&self, request: UnaryRequest) -> TransportResult<UnaryResponse>;
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("HTTP client failure: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Request to {0} was cancelled")]
    Canceled(String),
    #[error("Remote error [{code}]: {message}")]
    Remote { code: String, message: String },
    #[error("Message decoding failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
