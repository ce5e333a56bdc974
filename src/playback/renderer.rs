use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::wav::WavRenderer;
use crate::audio::{decode_segment, AudioSegment};
use crate::config::PlaybackConfig;

/// Output device for reply segments
///
/// Implementations:
/// - `PacedRenderer`: headless, waits out each segment's real duration
/// - `WavRenderer`: writes each segment to a WAV file
/// - `SpeakerRenderer`: default sound card (feature `speaker`)
#[async_trait::async_trait]
pub trait AudioRenderer: Send + Sync {
    /// Render one segment to completion
    ///
    /// Resolves when the segment has finished playing. Once `stop` is
    /// cancelled nothing more of this segment may be heard or written,
    /// including from work already handed to another thread. The scheduler
    /// may also drop this future at any point.
    async fn render(&self, segment: &AudioSegment, stop: &CancellationToken) -> Result<()>;

    /// Called after the active render's `stop` token is cancelled
    ///
    /// Returns once no output of that render can appear anymore.
    fn stop(&self) {}

    /// Renderer name for logging
    fn name(&self) -> &str;
}

/// Renders by waiting for the decoded duration of each segment
///
/// Completion is paced by audio time like a real device, without needing
/// one.
#[derive(Debug, Default)]
pub struct PacedRenderer;

impl PacedRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl AudioRenderer for PacedRenderer {
    async fn render(&self, segment: &AudioSegment, stop: &CancellationToken) -> Result<()> {
        let data = segment.data.clone();
        let decoded = tokio::task::spawn_blocking(move || decode_segment(data))
            .await
            .context("Decoder task panicked")??;

        let duration = decoded.duration();
        debug!(
            "Segment {}: {:.2}s of audio",
            segment.sequence,
            duration.as_secs_f64()
        );

        tokio::select! {
            () = stop.cancelled() => debug!("Segment {} stopped", segment.sequence),
            () = tokio::time::sleep(duration) => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "paced"
    }
}

/// Render back-end selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackOutput {
    Paced,
    Wav,
    Speaker,
}

/// Renderer factory
pub struct RendererFactory;

impl RendererFactory {
    pub fn create(
        output: PlaybackOutput,
        config: &PlaybackConfig,
    ) -> Result<Arc<dyn AudioRenderer>> {
        info!("Creating {:?} renderer", output);

        match output {
            PlaybackOutput::Paced => Ok(Arc::new(PacedRenderer::new())),

            PlaybackOutput::Wav => {
                let output_dir = shellexpand::tilde(&config.wav_output_dir);
                let renderer = WavRenderer::new(PathBuf::from(output_dir.as_ref()), "reply")?;
                Ok(Arc::new(renderer))
            }

            PlaybackOutput::Speaker => {
                #[cfg(feature = "speaker")]
                {
                    let renderer = super::speaker::SpeakerRenderer::open()?;
                    Ok(Arc::new(renderer))
                }

                #[cfg(not(feature = "speaker"))]
                {
                    anyhow::bail!("Speaker output requires building with the `speaker` feature")
                }
            }
        }
    }
}
