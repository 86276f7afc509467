//! Client for the remote generation endpoint

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use toeai_core::config::ApiConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::base::{
    Generation, GenerationError, GenerationResult, ResponseBody, StreamSummary, Transport,
};
use crate::decoder::Utf8StreamDecoder;
use crate::http::HttpTransport;

const GENERATE_PATH: &str = "generate";
const GENERATE_STREAM_PATH: &str = "generate_stream";

#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    prompt: &'a str,
}

/// Single-shot response body. The audio reference has shipped under two names.
#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
    #[serde(default, rename = "audioUrl")]
    audio_url_camel: Option<String>,
}

/// Issues prompts to the generation endpoint
#[derive(Clone)]
pub struct GenerationClient {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
}

impl GenerationClient {
    /// Create a client over any transport, with no single-shot timeout
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: None,
        }
    }

    /// Create an HTTP client for the configured endpoint
    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(Arc::new(HttpTransport::new(config.base_url.clone())))
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }

    /// Bound the total duration of single-shot requests.
    ///
    /// Streams are not bounded; cancel them through their token instead.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Submit `prompt` and wait for the complete response
    pub async fn generate(&self, prompt: &str) -> GenerationResult<Generation> {
        self.generate_cancellable(prompt, &CancellationToken::new()).await
    }

    /// Like [`generate`](Self::generate), but gives up as soon as `cancel`
    /// fires. A cancelled call returns an empty generation marked cancelled.
    pub async fn generate_cancellable(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> GenerationResult<Generation> {
        let exchange = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.generate_inner(prompt))
                    .await
                    .unwrap_or_else(|_| Err(GenerationError::Timeout(limit))),
                None => self.generate_inner(prompt).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Generation cancelled before the response arrived");
                Ok(Generation {
                    text: String::new(),
                    audio_url: None,
                    cancelled: true,
                })
            }
            generation = exchange => generation,
        }
    }

    async fn generate_inner(&self, prompt: &str) -> GenerationResult<Generation> {
        let body = serde_json::to_value(PromptRequest { prompt })?;
        debug!("Requesting generation ({} prompt chars)", prompt.chars().count());

        let response = self.transport.post_json(GENERATE_PATH, &body).await?;
        if !response.is_success() {
            let status = response.status;
            warn!("Generation request failed with HTTP {}", status);
            if let Ok(bytes) = read_body(response.body).await {
                debug!("Error body: {}", String::from_utf8_lossy(&bytes));
            }
            return Err(GenerationError::RequestFailed { status });
        }

        let bytes = read_body(response.body).await?;
        let parsed: GenerateResponse = serde_json::from_slice(&bytes)?;
        Ok(Generation {
            text: parsed.output.unwrap_or_default(),
            audio_url: parsed.audio_url.or(parsed.audio_url_camel),
            cancelled: false,
        })
    }

    /// Submit `prompt` and pass the response text to `on_chunk` as it arrives.
    ///
    /// Fragments are delivered in the order their bytes were received; a
    /// character split across network chunks is delivered whole with the
    /// later fragment. Firing `cancel` stops the request or the read loop
    /// at its next await and drops the body reader; fragments already
    /// delivered stay delivered and the summary is marked cancelled.
    pub async fn generate_stream<F>(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        mut on_chunk: F,
    ) -> GenerationResult<StreamSummary>
    where
        F: FnMut(&str),
    {
        let mut summary = StreamSummary::default();
        let body = serde_json::to_value(PromptRequest { prompt })?;
        debug!("Requesting generation stream ({} prompt chars)", prompt.chars().count());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Generation stream cancelled before the response arrived");
                summary.cancelled = true;
                return Ok(summary);
            }
            response = self.transport.post_json(GENERATE_STREAM_PATH, &body) => response?,
        };

        if !response.is_success() {
            let status = response.status;
            warn!("Generation stream failed with HTTP {}", status);
            return Err(GenerationError::StreamFailed { status });
        }

        let mut reader = match response.body {
            ResponseBody::Stream(reader) => reader,
            ResponseBody::Buffered(_) => return Err(GenerationError::StreamUnsupported),
        };

        let mut decoder = Utf8StreamDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                next = reader.next() => next,
            };

            let fragment = match next {
                Some(Ok(bytes)) => decoder.decode(&bytes),
                Some(Err(e)) => {
                    warn!("Generation stream broke after {} chunks: {}", summary.chunks, e);
                    return Err(e);
                }
                None => {
                    let tail = decoder.finish();
                    deliver(&mut summary, &mut on_chunk, tail);
                    break;
                }
            };
            deliver(&mut summary, &mut on_chunk, fragment);
        }
        drop(reader);

        debug!(
            "Generation stream ended: {} chunks, {} chars, cancelled={}",
            summary.chunks,
            summary.text.chars().count(),
            summary.cancelled
        );
        Ok(summary)
    }
}

fn deliver<F: FnMut(&str)>(summary: &mut StreamSummary, on_chunk: &mut F, fragment: String) {
    // A chunk holding only part of a character decodes to nothing yet.
    if fragment.is_empty() {
        return;
    }
    on_chunk(&fragment);
    summary.chunks += 1;
    summary.text.push_str(&fragment);
}

async fn read_body(body: ResponseBody) -> GenerationResult<Vec<u8>> {
    match body {
        ResponseBody::Buffered(bytes) => Ok(bytes.to_vec()),
        ResponseBody::Stream(mut reader) => {
            let mut buffer = Vec::new();
            while let Some(chunk) = reader.next().await {
                buffer.extend_from_slice(&chunk?);
            }
            Ok(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::TransportResponse;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use mockito::Matcher;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-process transport that replays a fixed response chunk by chunk
    struct ScriptedTransport {
        status: u16,
        chunks: Vec<Vec<u8>>,
        buffered: bool,
        hang_after_chunks: bool,
        requests: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl ScriptedTransport {
        fn new(status: u16, chunks: Vec<&[u8]>) -> Self {
            Self {
                status,
                chunks: chunks.into_iter().map(<[u8]>::to_vec).collect(),
                buffered: false,
                hang_after_chunks: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn text(chunks: &[&str]) -> Self {
            Self::new(200, chunks.iter().map(|c| c.as_bytes()).collect())
        }

        fn buffered(mut self) -> Self {
            self.buffered = true;
            self
        }

        fn hanging(mut self) -> Self {
            self.hang_after_chunks = true;
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post_json(
            &self,
            path: &str,
            body: &serde_json::Value,
        ) -> GenerationResult<TransportResponse> {
            self.requests.lock().unwrap().push((path.to_string(), body.clone()));

            let body = if self.buffered {
                ResponseBody::Buffered(Bytes::from(self.chunks.concat()))
            } else {
                let items: Vec<GenerationResult<Bytes>> = self
                    .chunks
                    .iter()
                    .map(|c| Ok(Bytes::from(c.clone())))
                    .collect();
                if self.hang_after_chunks {
                    ResponseBody::Stream(Box::pin(stream::iter(items).chain(stream::pending())))
                } else {
                    ResponseBody::Stream(Box::pin(stream::iter(items)))
                }
            };
            Ok(TransportResponse {
                status: self.status,
                body,
            })
        }
    }

    fn client_for(transport: ScriptedTransport) -> (Arc<ScriptedTransport>, GenerationClient) {
        let transport = Arc::new(transport);
        (transport.clone(), GenerationClient::new(transport))
    }

    #[tokio::test]
    async fn test_stream_delivers_chunks_in_order() {
        let (transport, client) = client_for(ScriptedTransport::text(&["Hel", "lo, ", "world"]));
        let token = CancellationToken::new();

        let mut received = Vec::new();
        let summary = client
            .generate_stream("greet", &token, |chunk| received.push(chunk.to_string()))
            .await
            .unwrap();

        assert_eq!(received, vec!["Hel", "lo, ", "world"]);
        assert_eq!(summary.text, "Hello, world");
        assert_eq!(summary.chunks, 3);
        assert!(!summary.cancelled);

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].0, "generate_stream");
        assert_eq!(requests[0].1, json!({"prompt": "greet"}));
    }

    #[tokio::test]
    async fn test_stream_keeps_split_characters_whole() {
        let bytes = "ok 🦀 é".as_bytes();
        // cut inside the crab and inside the é
        let chunks = vec![&bytes[..5], &bytes[5..8], &bytes[8..9], &bytes[9..]];
        let (_, client) = client_for(ScriptedTransport::new(200, chunks));
        let token = CancellationToken::new();

        let mut received = Vec::new();
        let summary = client
            .generate_stream("x", &token, |chunk| received.push(chunk.to_string()))
            .await
            .unwrap();

        // the chunk holding only the first byte of é delivers nothing
        assert_eq!(received, vec!["ok ", "🦀 ", "é"]);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.text, "ok 🦀 é");
        assert!(received.iter().all(|c| !c.contains('\u{FFFD}')));
    }

    #[tokio::test]
    async fn test_stream_flushes_truncated_tail() {
        let chunks = vec![&b"end"[..], &[0xE2u8, 0x82][..]];
        let (_, client) = client_for(ScriptedTransport::new(200, chunks));
        let token = CancellationToken::new();

        let mut received = Vec::new();
        client
            .generate_stream("x", &token, |chunk| received.push(chunk.to_string()))
            .await
            .unwrap();
        assert_eq!(received, vec!["end", "\u{FFFD}"]);
    }

    #[tokio::test]
    async fn test_stream_failure_status() {
        let (_, client) = client_for(ScriptedTransport::new(503, vec![b"busy"]));
        let token = CancellationToken::new();

        let mut calls = 0;
        let err = client
            .generate_stream("x", &token, |_| calls += 1)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::StreamFailed { status: 503 }));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_stream_unsupported_without_incremental_body() {
        let (_, client) = client_for(ScriptedTransport::text(&["whole"]).buffered());
        let token = CancellationToken::new();

        let err = client.generate_stream("x", &token, |_| {}).await.unwrap_err();
        assert!(matches!(err, GenerationError::StreamUnsupported));
    }

    #[tokio::test]
    async fn test_cancel_from_callback_stops_reading() {
        let (_, client) = client_for(ScriptedTransport::text(&["one", "two", "three"]));
        let token = CancellationToken::new();

        let mut received = Vec::new();
        let summary = client
            .generate_stream("x", &token, |chunk| {
                received.push(chunk.to_string());
                token.cancel();
            })
            .await
            .unwrap();

        assert_eq!(received, vec!["one"]);
        assert!(summary.cancelled);
        assert_eq!(summary.text, "one");
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_data() {
        let (_, client) = client_for(ScriptedTransport::text(&["partial"]).hanging());
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let mut received = Vec::new();
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            client.generate_stream("x", &token, |chunk| received.push(chunk.to_string())),
        )
        .await
        .expect("cancellation should end the stream")
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(received, vec!["partial"]);
    }

    #[tokio::test]
    async fn test_cancel_before_request() {
        let (_, client) = client_for(ScriptedTransport::text(&["never"]));
        let token = CancellationToken::new();
        token.cancel();

        let mut calls = 0;
        let summary = client
            .generate_stream("x", &token, |_| calls += 1)
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_generate_over_buffered_transport() {
        let (transport, client) = client_for(
            ScriptedTransport::text(&[r#"{"output":"hi there","audio_url":"a.mp3"}"#]).buffered(),
        );

        let generation = client.generate("hello").await.unwrap();
        assert_eq!(generation.text, "hi there");
        assert_eq!(generation.audio_url.as_deref(), Some("a.mp3"));
        assert_eq!(transport.requests.lock().unwrap()[0].0, "generate");
    }

    #[tokio::test]
    async fn test_generate_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .match_body(Matcher::Json(json!({"prompt": "Tell me a joke"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"output":"Why did the crab...","audioUrl":"https://cdn/joke.mp3"}"#)
            .create_async()
            .await;

        let client = GenerationClient::new(Arc::new(HttpTransport::new(server.url())));
        let generation = client.generate("Tell me a joke").await.unwrap();

        assert_eq!(generation.text, "Why did the crab...");
        assert_eq!(generation.audio_url.as_deref(), Some("https://cdn/joke.mp3"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_prefers_snake_case_audio_and_defaults_output() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate")
            .with_status(200)
            .with_body(r#"{"audio_url":"first.mp3","audioUrl":"second.mp3"}"#)
            .create_async()
            .await;

        let client = GenerationClient::new(Arc::new(HttpTransport::new(server.url())));
        let generation = client.generate("x").await.unwrap();
        assert_eq!(generation.text, "");
        assert_eq!(generation.audio_url.as_deref(), Some("first.mp3"));
    }

    #[tokio::test]
    async fn test_generate_without_audio() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate")
            .with_status(201)
            .with_body(r#"{"output":"plain"}"#)
            .create_async()
            .await;

        let client = GenerationClient::new(Arc::new(HttpTransport::new(server.url())));
        let generation = client.generate("x").await.unwrap();
        assert_eq!(
            generation,
            Generation {
                text: "plain".to_string(),
                audio_url: None,
                cancelled: false,
            }
        );
    }

    #[tokio::test]
    async fn test_generate_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = GenerationClient::new(Arc::new(HttpTransport::new(server.url())));
        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, GenerationError::RequestFailed { status: 500 }));
    }

    #[tokio::test]
    async fn test_generate_malformed_json() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = GenerationClient::new(Arc::new(HttpTransport::new(server.url())));
        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, GenerationError::JsonError(_)));
    }

    #[tokio::test]
    async fn test_stream_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/generate_stream")
            .match_body(Matcher::Json(json!({"prompt": "stream please"})))
            .with_status(200)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body("streamed text ✓")
            .create_async()
            .await;

        let client = GenerationClient::new(Arc::new(HttpTransport::new(server.url())));
        let token = CancellationToken::new();
        let mut text = String::new();
        let summary = client
            .generate_stream("stream please", &token, |chunk| text.push_str(chunk))
            .await
            .unwrap();

        assert_eq!(text, "streamed text ✓");
        assert_eq!(summary.text, text);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stream_over_http_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate_stream")
            .with_status(502)
            .create_async()
            .await;

        let client = GenerationClient::new(Arc::new(HttpTransport::new(server.url())));
        let token = CancellationToken::new();
        let err = client.generate_stream("x", &token, |_| {}).await.unwrap_err();
        assert!(matches!(err, GenerationError::StreamFailed { status: 502 }));
    }

    #[tokio::test]
    async fn test_generate_cancelled_while_waiting() {
        let (transport, client) = client_for(ScriptedTransport::text(&["{}"]).hanging());
        let client = client.with_timeout(Duration::from_secs(30));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let generation = tokio::time::timeout(
            Duration::from_secs(5),
            client.generate_cancellable("x", &token),
        )
        .await
        .expect("cancellation should end the call before the timeout")
        .unwrap();

        assert!(generation.cancelled);
        assert_eq!(generation.text, "");
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_generate_already_cancelled_skips_request() {
        let (transport, client) = client_for(ScriptedTransport::text(&["{}"]).hanging());
        let token = CancellationToken::new();
        token.cancel();

        let generation = client.generate_cancellable("x", &token).await.unwrap();
        assert!(generation.cancelled);
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_times_out() {
        let (_, client) = client_for(ScriptedTransport::text(&["{}"]).hanging());
        let client = client.with_timeout(Duration::from_millis(50));

        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
    }
}
