use anyhow::{Context, Result};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, info};

use crate::audio::CapturedAudio;
use crate::config::BackendConfig;

/// Raw frames of one response stream, in transport order
pub type FrameStream = BoxStream<'static, Result<Bytes>>;

/// Connection to the response-generating backend
#[async_trait::async_trait]
pub trait ResponseTransport: Send + Sync {
    /// Upload a captured utterance and open its reply stream
    async fn submit(&self, audio: CapturedAudio) -> Result<FrameStream>;

    /// Ask the backend to stop producing frames
    ///
    /// Fire-and-forget: callers log failures and move on.
    async fn notify_stop(&self) -> Result<()>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// HTTP transport: POST the audio, read `text/event-stream` back
pub struct HttpTransport {
    client: Client,
    backend: BackendConfig,
}

impl HttpTransport {
    pub fn new(backend: BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, backend })
    }
}

#[async_trait::async_trait]
impl ResponseTransport for HttpTransport {
    async fn submit(&self, audio: CapturedAudio) -> Result<FrameStream> {
        let url = self.backend.submit_url();
        info!("Submitting {} bytes of {} to {}", audio.len(), audio.content_type, url);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, audio.content_type.as_str())
            .body(audio.data)
            .send()
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Backend returned {}: {}", status, error_text);
        }

        debug!("Response stream open ({})", status);

        let frames = response
            .bytes_stream()
            .map(|frame| frame.context("Response stream read failed"));

        Ok(frames.boxed())
    }

    async fn notify_stop(&self) -> Result<()> {
        let url = self.backend.stop_url();
        debug!("Notifying backend stop at {}", url);

        self.client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("Stop notification to {} failed", url))?
            .error_for_status()
            .context("Backend rejected stop notification")?;

        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
