//! Test doubles shared by the integration tests
#![allow(dead_code)]

use anyhow::Result;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use voicebot_client::stream::FrameStream;
use voicebot_client::{AudioRenderer, AudioSegment, CapturedAudio, ResponseTransport};

/// Transport whose reply frames are fed by the test
pub struct ScriptedTransport {
    frames: Mutex<Option<mpsc::UnboundedReceiver<Result<Bytes>>>>,
    fail_submit: bool,
    submits: AtomicUsize,
    stops: AtomicUsize,
}

impl ScriptedTransport {
    /// Returns the transport and the sender for its single reply stream
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<Bytes>>) {
        let (tx, rx) = mpsc::unbounded();
        let transport = Self {
            frames: Mutex::new(Some(rx)),
            fail_submit: false,
            submits: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        };
        (transport, tx)
    }

    pub fn failing() -> Self {
        let (mut transport, _) = Self::new();
        transport.fail_submit = true;
        transport
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Stop notifications are spawned; give them a moment to land
    pub async fn wait_stops(&self, n: usize) {
        for _ in 0..200 {
            if self.stops() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} stop notifications, got {}", n, self.stops());
    }
}

#[async_trait::async_trait]
impl ResponseTransport for ScriptedTransport {
    async fn submit(&self, _audio: CapturedAudio) -> Result<FrameStream> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if self.fail_submit {
            anyhow::bail!("connection refused");
        }

        let frames = self.frames.lock().unwrap().take();
        match frames {
            Some(rx) => Ok(rx.boxed()),
            // Later sessions get a stream that never produces anything
            None => Ok(futures::stream::pending::<Result<Bytes>>().boxed()),
        }
    }

    async fn notify_stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Renderer that records segment order; each render waits for a permit
/// unless created with `free_running`
pub struct GatedRenderer {
    permits: Semaphore,
    gated: bool,
    started: Mutex<Vec<u64>>,
    stops: AtomicUsize,
}

impl GatedRenderer {
    pub fn gated() -> Self {
        Self {
            permits: Semaphore::new(0),
            gated: true,
            started: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn free_running() -> Self {
        Self {
            gated: false,
            ..Self::gated()
        }
    }

    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    pub fn started(&self) -> Vec<u64> {
        self.started.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub async fn wait_started(&self, n: usize) {
        for _ in 0..1000 {
            if self.started.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} renders to start, got {:?}", n, self.started());
    }
}

#[async_trait::async_trait]
impl AudioRenderer for GatedRenderer {
    async fn render(&self, segment: &AudioSegment, _stop: &CancellationToken) -> Result<()> {
        self.started.lock().unwrap().push(segment.sequence);
        if self.gated {
            self.permits.acquire().await?.forget();
        } else {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "gated"
    }
}

pub fn captured() -> CapturedAudio {
    CapturedAudio::new(vec![0u8; 64], "audio/wav").unwrap()
}

/// A short mono 16-bit WAV file in memory
pub fn wav_bytes(sample_rate: u32, samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            writer.write_sample(((i % 64) as i16 - 32) * 256).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Deliver one raw frame on a scripted reply stream
pub fn push(tx: &mpsc::UnboundedSender<Result<Bytes>>, frame: &str) {
    let _ = tx.unbounded_send(Ok(Bytes::from(frame.to_string())));
}

/// Fail the scripted reply stream
pub fn fail(tx: &mpsc::UnboundedSender<Result<Bytes>>, message: &str) {
    let _ = tx.unbounded_send(Err(anyhow::anyhow!(message.to_string())));
}
