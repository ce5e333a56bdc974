//! Serial FIFO playback of reply segments
//!
//! Segments arrive while the stream is still being consumed; they are
//! rendered one at a time, in arrival order, each render starting when
//! the previous one completes. The front of the queue is the segment
//! being rendered.
//!
//! Every render is tagged with the scheduler generation and the segment
//! sequence. `cancel` bumps the generation, so a completion from a render
//! that was already in flight finds a mismatched tag and is ignored.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::renderer::AudioRenderer;
use crate::audio::AudioSegment;
use crate::events::SpeakingIndicator;
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

struct ActiveRender {
    generation: u64,
    sequence: u64,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct SchedulerInner {
    queue: VecDeque<AudioSegment>,
    state: PlaybackState,
    generation: u64,
    active: Option<ActiveRender>,
    closed: bool,
    accepted: u64,
    played: usize,
    failed: usize,
}

/// Playback queue for one session
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
    renderer: Arc<dyn AudioRenderer>,
    session_cancel: CancellationToken,
    speaking: SpeakingIndicator,
    state_tx: Arc<watch::Sender<PlaybackState>>,
}

impl PlaybackScheduler {
    pub fn new(
        renderer: Arc<dyn AudioRenderer>,
        session_cancel: CancellationToken,
        speaking: SpeakingIndicator,
    ) -> Self {
        let (state_tx, _) = watch::channel(PlaybackState::Idle);

        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                queue: VecDeque::new(),
                state: PlaybackState::Idle,
                generation: 0,
                active: None,
                closed: false,
                accepted: 0,
                played: 0,
                failed: 0,
            })),
            renderer,
            session_cancel,
            speaking,
            state_tx: Arc::new(state_tx),
        }
    }

    /// Append a segment; start rendering it if nothing is playing
    ///
    /// Returns false if the segment was dropped because the scheduler was
    /// cancelled.
    pub fn enqueue(&self, segment: AudioSegment) -> bool {
        let mut inner = lock(&self.inner);

        if inner.closed || self.session_cancel.is_cancelled() {
            debug!("Dropping segment {} after cancellation", segment.sequence);
            return false;
        }

        // Decided under the same lock as the append: two back-to-back
        // segments can never both see an empty queue.
        let start_now = inner.state == PlaybackState::Idle && inner.queue.is_empty();
        inner.queue.push_back(segment);
        inner.accepted += 1;

        if start_now {
            self.speaking.raise();
            self.start_front(&mut inner);
        }

        true
    }

    /// Stop the active render, drop everything queued, go idle
    ///
    /// No render starts for this scheduler after `cancel` returns, and the
    /// active render produces no further output.
    pub fn cancel(&self) {
        let active = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.closed = true;

            let dropped = inner.queue.len();
            inner.queue.clear();
            self.set_state(&mut inner, PlaybackState::Idle);

            if dropped > 0 {
                info!("Playback cancelled, {} segments dropped", dropped);
            }
            inner.active.take()
        };

        if let Some(active) = active {
            debug!("Stopping render of segment {}", active.sequence);
            active.stop.cancel();
            self.renderer.stop();
            active.task.abort();
        }
    }

    pub fn state(&self) -> PlaybackState {
        lock(&self.inner).state
    }

    /// Segments queued, including the one rendering
    pub fn pending(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    /// Segments accepted into the queue since creation
    pub fn accepted(&self) -> u64 {
        lock(&self.inner).accepted
    }

    /// Renders finished, successfully or not
    pub fn played(&self) -> usize {
        lock(&self.inner).played
    }

    pub fn failed(&self) -> usize {
        lock(&self.inner).failed
    }

    /// Wait until the queue has drained (or was cancelled)
    pub async fn wait_idle(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == PlaybackState::Idle).await;
    }

    fn start_front(&self, inner: &mut SchedulerInner) {
        let Some(segment) = inner.queue.front().cloned() else {
            return;
        };

        let generation = inner.generation;
        let sequence = segment.sequence;
        let stop = CancellationToken::new();

        debug!(
            "Rendering segment {} via {} ({} bytes)",
            sequence,
            self.renderer.name(),
            segment.len()
        );

        let scheduler = self.clone();
        let renderer = Arc::clone(&self.renderer);
        let render_stop = stop.clone();

        let task = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = render_stop.cancelled() => return,
                result = renderer.render(&segment, &render_stop) => result,
            };

            scheduler.on_render_complete(generation, sequence, result);
        });

        inner.active = Some(ActiveRender {
            generation,
            sequence,
            stop,
            task,
        });
        self.set_state(inner, PlaybackState::Playing);
    }

    fn on_render_complete(&self, generation: u64, sequence: u64, result: anyhow::Result<()>) {
        let mut inner = lock(&self.inner);

        let current = inner
            .active
            .as_ref()
            .is_some_and(|a| a.generation == generation && a.sequence == sequence);

        if inner.generation != generation || !current {
            debug!(
                "Ignoring stale completion for segment {} (generation {}, current {})",
                sequence, generation, inner.generation
            );
            return;
        }

        // A failed segment must not stall the rest of the queue
        match result {
            Ok(()) => debug!("Segment {} finished", sequence),
            Err(e) => {
                warn!("Segment {} failed to render: {:#}", sequence, e);
                inner.failed += 1;
            }
        }

        inner.active = None;
        inner.queue.pop_front();
        inner.played += 1;

        if !inner.queue.is_empty() && !self.session_cancel.is_cancelled() {
            self.start_front(&mut inner);
        } else {
            inner.queue.clear();
            self.speaking.lower();
            self.set_state(&mut inner, PlaybackState::Idle);
        }
    }

    fn set_state(&self, inner: &mut SchedulerInner, state: PlaybackState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }
}
