//! Shared types for generation clients and transports

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Error type for generation operations
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation request failed with HTTP {status}")]
    RequestFailed { status: u16 },

    #[error("Generation stream failed with HTTP {status}")]
    StreamFailed { status: u16 },

    #[error("Streaming responses are not supported by this transport")]
    StreamUnsupported,

    #[error("Generation request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type GenerationResult<T> = Result<T, GenerationError>;

/// Incremental reader over a response body
pub type ByteStream = Pin<Box<dyn Stream<Item = GenerationResult<Bytes>> + Send>>;

/// Body of a transport response
pub enum ResponseBody {
    /// Body that can be read chunk by chunk as it arrives
    Stream(ByteStream),
    /// Body that was read in full before being handed over
    Buffered(Bytes),
}

/// Status and body of a response from the generation endpoint
pub struct TransportResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends JSON requests to the generation endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` as JSON to `path`, relative to the endpoint base
    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> GenerationResult<TransportResponse>;
}

/// Result of a single-shot generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub audio_url: Option<String>,
    /// True if the cancellation token fired before the response arrived
    pub cancelled: bool,
}

/// What a streaming generation delivered before it ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Every delivered fragment, concatenated
    pub text: String,
    /// Number of fragments passed to the chunk callback
    pub chunks: usize,
    /// True if the stream stopped because the cancellation token fired
    pub cancelled: bool,
}
