use anyhow::{Context, Result};
use bytes::Bytes;
use std::io::Cursor;
use std::path::Path;
use tracing::info;

/// A captured utterance, opaque to this crate
///
/// Produced by whatever records the microphone; submitted as-is to the
/// backend with its content type.
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    pub data: Bytes,
    pub content_type: String,
}

impl CapturedAudio {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            anyhow::bail!("Captured audio is empty");
        }

        Ok(Self {
            data,
            content_type: content_type.into(),
        })
    }

    /// Load a recording from disk
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening captured audio: {}", path.display());

        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read captured audio: {}", path.display()))?;

        let content_type = content_type_for(path);

        if content_type == "audio/wav" {
            let reader = hound::WavReader::new(Cursor::new(&data))
                .context("Failed to parse WAV header")?;
            let spec = reader.spec();
            let duration_seconds =
                reader.duration() as f64 / spec.sample_rate.max(1) as f64;

            info!(
                "Captured audio: {:.1}s, {}Hz, {} channels",
                duration_seconds, spec.sample_rate, spec.channels
            );
        }

        Self::new(data, content_type)
            .with_context(|| format!("No audio captured in {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}
