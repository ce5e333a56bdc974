use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::renderer::AudioRenderer;
use crate::audio::{decode_segment, AudioSegment, DecodedAudio};
use crate::sync::lock;

/// Samples written between two stop checks
const STOP_CHECK_SAMPLES: usize = 4096;

/// Writes every rendered segment to `<prefix>-segment-NNNN.wav`
///
/// Each file is written as `.part` and renamed into place only if the
/// render was not stopped, so a cancelled segment leaves nothing behind.
/// File numbering continues across sessions, so replies never overwrite
/// each other within one process.
pub struct WavRenderer {
    output_dir: PathBuf,
    prefix: String,
    next_index: AtomicUsize,
    /// Held while a finished file is published; `stop` waits on it
    publish: Arc<Mutex<()>>,
}

impl WavRenderer {
    pub fn new(output_dir: PathBuf, prefix: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&output_dir).context("Failed to create output directory")?;

        let prefix = prefix.into();
        info!(
            "WAV renderer writing to {} (prefix: {})",
            output_dir.display(),
            prefix
        );

        Ok(Self {
            output_dir,
            prefix,
            next_index: AtomicUsize::new(0),
            publish: Arc::new(Mutex::new(())),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait::async_trait]
impl AudioRenderer for WavRenderer {
    async fn render(&self, segment: &AudioSegment, stop: &CancellationToken) -> Result<()> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let path = self
            .output_dir
            .join(format!("{}-segment-{:04}.wav", self.prefix, index));

        let data = segment.data.clone();
        let sequence = segment.sequence;
        let stop = stop.clone();
        let publish = Arc::clone(&self.publish);

        // Runs to completion even if this future is dropped; the stop token
        // is what keeps it from producing a file after a cancel.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let decoded = decode_segment(data)?;
            if stop.is_cancelled() {
                debug!("Segment {} stopped before writing", sequence);
                return Ok(());
            }

            if write_segment(&path, &decoded, &stop, &publish)?.is_none() {
                debug!("Segment {} stopped, partial file removed", sequence);
            }
            Ok(())
        })
        .await
        .context("WAV writer task panicked")?
    }

    fn stop(&self) {
        // The active render's token is already cancelled; once any publish
        // in progress is done, none can follow.
        drop(lock(&self.publish));
    }

    fn name(&self) -> &str {
        "wav"
    }
}

/// Write `audio` to `path`, unless `stop` fires first
///
/// Returns the number of samples written, or None if the render was
/// stopped (the partial file is removed).
fn write_segment(
    path: &Path,
    audio: &DecodedAudio,
    stop: &CancellationToken,
    publish: &Mutex<()>,
) -> Result<Option<usize>> {
    let partial = path.with_extension("wav.part");

    let written = match write_partial(&partial, audio, stop) {
        Ok(Some(written)) => written,
        Ok(None) => {
            discard(&partial);
            return Ok(None);
        }
        Err(e) => {
            discard(&partial);
            return Err(e);
        }
    };

    let _publishing = lock(publish);
    if stop.is_cancelled() {
        discard(&partial);
        return Ok(None);
    }

    fs::rename(&partial, path)
        .with_context(|| format!("Failed to move WAV file into place: {:?}", path))?;

    info!(
        "Segment written: {} ({:.2}s, {} samples)",
        path.display(),
        audio.duration().as_secs_f64(),
        written
    );
    Ok(Some(written))
}

fn write_partial(
    partial: &Path,
    audio: &DecodedAudio,
    stop: &CancellationToken,
) -> Result<Option<usize>> {
    let mut writer = SegmentWriter::create(partial, audio)?;

    for chunk in audio.samples.chunks(STOP_CHECK_SAMPLES) {
        if stop.is_cancelled() {
            return Ok(None);
        }
        writer.write(chunk)?;
    }

    writer.finish().map(Some)
}

fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial WAV file {:?}: {}", partial, e);
        }
    }
}

/// One WAV file being written
struct SegmentWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_count: usize,
}

impl SegmentWriter {
    fn create(path: &Path, audio: &DecodedAudio) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: audio.channels.max(1),
            sample_rate: audio.sample_rate.max(1),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        Ok(Self {
            writer: Some(writer),
            sample_count: 0,
        })
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
            self.sample_count += samples.len();
        }

        Ok(())
    }

    fn finish(mut self) -> Result<usize> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }

        Ok(self.sample_count)
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
