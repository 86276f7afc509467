//! reqwest-backed transport

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::base::{GenerationError, GenerationResult, ResponseBody, Transport, TransportResponse};

/// Time allowed for establishing a connection to the endpoint
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport that POSTs to `<base_url>/<path>` over HTTP
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> GenerationResult<TransportResponse> {
        let url = self.url_for(path);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status().as_u16();
        debug!("{} answered HTTP {}", url, status);

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GenerationError::from));
        Ok(TransportResponse {
            status,
            body: ResponseBody::Stream(Box::pin(stream)),
        })
    }
}
