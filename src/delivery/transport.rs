use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::queue::QueueEntry;

#[derive(Debug, Clone, Error)]
#[error("collector transport error: {message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Opaque send capability toward the collector. Any failure is treated as
/// transient by the delivery scheduler and retried on a later tick; the
/// entry stays queued until a send succeeds.
#[async_trait]
pub trait CollectorTransport: Send + Sync {
    async fn send(&self, entry: &QueueEntry) -> Result<(), TransportError>;
}

/// HTTP transport that POSTs one measurement record per send as JSON.
pub struct HttpCollectorTransport {
    client: Client,
    endpoint: String,
}

impl HttpCollectorTransport {
    /// Creates a transport targeting the collector base endpoint (e.g.
    /// `https://collector.example.net/ingest`).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(TransportError::new("collector endpoint must not be empty"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::new(format!("http client build failed: {err}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl CollectorTransport for HttpCollectorTransport {
    async fn send(&self, entry: &QueueEntry) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(entry)
            .send()
            .await
            .map_err(|err| TransportError::new(format!("collector request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(TransportError::new(format!(
                "collector returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
