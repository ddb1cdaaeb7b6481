use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;

/// Progress callback: (bytes received so far, total bytes or 0 when the
/// server does not announce a length).
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Network(String),
    #[error("Unexpected status {0}")]
    Status(u16),
}

/// Byte-fetch seam over the HTTP stack.
///
/// Only the request/status/progress contract is pinned down here; tests
/// substitute their own transfers and the control loop never blocks on one.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url`, reporting received bytes through `progress` while the body
    /// streams in. Non-2xx responses are errors.
    async fn fetch(
        &self,
        url: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<u8>, TransportError>;
}

/// `reqwest`-backed transport used by real builds.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let total = response.content_length().unwrap_or(0);
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Network(e.to_string()))?;
            body.extend_from_slice(&chunk);
            if let Some(cb) = &progress {
                cb(body.len() as u64, total);
            }
        }
        Ok(body)
    }
}
