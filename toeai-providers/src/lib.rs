//! Text-generation endpoint client for toeai
//!
//! This crate talks to the remote generation service, either for a single
//! complete response or for an incrementally streamed one.

pub mod base;
pub mod client;
pub mod decoder;
pub mod http;

pub use base::{
    ByteStream, Generation, GenerationError, GenerationResult, ResponseBody, StreamSummary,
    Transport, TransportResponse,
};
pub use client::GenerationClient;
pub use decoder::Utf8StreamDecoder;
pub use http::HttpTransport;
pub use tokio_util::sync::CancellationToken;
