use anyhow::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use super::renderer::AudioRenderer;
use crate::audio::AudioSegment;
use crate::sync::lock;

/// Renderer whose renders finish only when the test says so
pub(crate) struct ScriptedRenderer {
    started: Mutex<Vec<u64>>,
    started_notify: Notify,
    releases: Semaphore,
    failing: HashSet<u64>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    stops: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedRenderer {
    pub(crate) fn new() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            started_notify: Notify::new(),
            releases: Semaphore::new(0),
            failing: HashSet::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Make the render of `sequence` fail once released
    pub(crate) fn failing(mut self, sequence: u64) -> Self {
        self.failing.insert(sequence);
        self
    }

    /// Let one pending (or future) render finish
    pub(crate) fn release(&self) {
        self.releases.add_permits(1);
    }

    pub(crate) fn started(&self) -> Vec<u64> {
        lock(&self.started).clone()
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_started(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.started_notify.notified();
                if lock(&self.started).len() >= count {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("render did not start in time");
    }
}

#[async_trait::async_trait]
impl AudioRenderer for ScriptedRenderer {
    async fn render(&self, segment: &AudioSegment, _stop: &CancellationToken) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now, Ordering::SeqCst);

        lock(&self.started).push(segment.sequence);
        self.started_notify.notify_waiters();

        self.releases.acquire().await?.forget();

        if self.failing.contains(&segment.sequence) {
            anyhow::bail!("scripted failure for segment {}", segment.sequence);
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
