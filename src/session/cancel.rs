use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::state::{Session, SessionState};
use crate::events::{EventEmitter, SessionStatus, SpeakingIndicator};
use crate::playback::PlaybackScheduler;
use crate::stream::ResponseTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The user pressed stop
    User,
    /// The response stream failed or timed out
    TransportFailure,
    /// A new session was started over this one
    Superseded,
}

/// The one way a session becomes `Cancelled`
///
/// Stops stream consumption, notifies the backend, empties playback and
/// clears the speaking indicator. Idempotent.
pub struct CancellationController {
    session: Arc<Session>,
    scheduler: PlaybackScheduler,
    speaking: SpeakingIndicator,
    transport: Arc<dyn ResponseTransport>,
    events: EventEmitter,
    fired: AtomicBool,
}

impl CancellationController {
    pub fn new(
        session: Arc<Session>,
        scheduler: PlaybackScheduler,
        speaking: SpeakingIndicator,
        transport: Arc<dyn ResponseTransport>,
        events: EventEmitter,
    ) -> Self {
        Self {
            session,
            scheduler,
            speaking,
            transport,
            events,
            fired: AtomicBool::new(false),
        }
    }

    /// Cancel the session
    ///
    /// Returns true if this call did the cancelling, false if the session
    /// was already cancelled or had already completed. Once this returns,
    /// no further transcript, speech or speaking change is produced.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!("Session {} already cancelled", self.session.id());
            return false;
        }

        if self.session.state() == SessionState::Completed {
            debug!("Session {} already completed, nothing to cancel", self.session.id());
            return false;
        }

        info!("Cancelling session {} ({:?})", self.session.id(), reason);

        // 1. Stream consumption stops at its next step
        self.session.cancel_token().cancel();

        // 2. Best effort: tell the backend to stop producing
        self.notify_backend();

        // 3. No more audio
        self.scheduler.cancel();

        // 4. Indicator off for good
        self.speaking.close();

        if self.session.advance(SessionState::Cancelled) {
            self.events.status(SessionStatus::Stopped);
        }

        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    fn notify_backend(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, skipping backend stop notification");
            return;
        };

        let transport = Arc::clone(&self.transport);
        let session_id = self.session.id().to_string();

        runtime.spawn(async move {
            match transport.notify_stop().await {
                Ok(()) => debug!("Backend acknowledged stop for {}", session_id),
                Err(e) => warn!("Backend stop notification failed (ignored): {:#}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSegment, CapturedAudio};
    use crate::events::SessionEventKind;
    use crate::playback::test_support::ScriptedRenderer;
    use crate::stream::FrameStream;
    use anyhow::Result;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct CountingTransport {
        stops: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ResponseTransport for CountingTransport {
        async fn submit(&self, _audio: CapturedAudio) -> Result<FrameStream> {
            anyhow::bail!("not used")
        }

        async fn notify_stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("backend unreachable")
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct Harness {
        controller: CancellationController,
        session: Arc<Session>,
        scheduler: PlaybackScheduler,
        speaking: SpeakingIndicator,
        renderer: Arc<ScriptedRenderer>,
        transport: Arc<CountingTransport>,
        events: mpsc::UnboundedReceiver<crate::events::SessionEvent>,
    }

    fn harness() -> Harness {
        let session = Arc::new(Session::new());
        session.advance(SessionState::Capturing);
        session.advance(SessionState::Uploading);
        session.advance(SessionState::Streaming);

        let (tx, events) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new(session.id(), tx);
        let speaking = SpeakingIndicator::new(emitter.clone());
        let renderer = Arc::new(ScriptedRenderer::new());
        let scheduler = PlaybackScheduler::new(
            renderer.clone(),
            session.cancel_token().clone(),
            speaking.clone(),
        );
        let transport = Arc::new(CountingTransport::default());

        let controller = CancellationController::new(
            Arc::clone(&session),
            scheduler.clone(),
            speaking.clone(),
            transport.clone(),
            emitter,
        );

        Harness {
            controller,
            session,
            scheduler,
            speaking,
            renderer,
            transport,
            events,
        }
    }

    async fn wait_for_stop(transport: &CountingTransport) {
        for _ in 0..100 {
            if transport.stops.load(Ordering::SeqCst) > 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_cancel_applies_every_effect() {
        let mut h = harness();

        h.speaking.raise();
        h.scheduler.enqueue(AudioSegment::new(0, vec![1]));
        h.scheduler.enqueue(AudioSegment::new(1, vec![2]));
        h.renderer.wait_started(1).await;

        assert!(h.controller.cancel(CancelReason::User));

        assert!(h.session.is_cancelled());
        assert!(h.controller.is_cancelled());
        assert_eq!(h.session.state(), SessionState::Cancelled);
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(h.renderer.stops(), 1);
        assert!(!h.speaking.is_speaking());

        // A failing stop notification does not matter
        wait_for_stop(&h.transport).await;
        assert_eq!(h.transport.stops.load(Ordering::SeqCst), 1);

        let mut kinds = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds.last(),
            Some(&SessionEventKind::Status {
                status: SessionStatus::Stopped
            })
        );
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let h = harness();

        assert!(h.controller.cancel(CancelReason::TransportFailure));
        assert!(!h.controller.cancel(CancelReason::User));

        wait_for_stop(&h.transport).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(h.transport.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_a_no_op() {
        let h = harness();
        assert!(h.session.advance(SessionState::Completed));

        assert!(!h.controller.cancel(CancelReason::User));
        assert_eq!(h.session.state(), SessionState::Completed);
        assert!(!h.session.is_cancelled());
    }

    #[tokio::test]
    async fn test_raise_after_cancel_stays_off() {
        let h = harness();
        h.controller.cancel(CancelReason::Superseded);

        h.speaking.raise();
        assert!(!h.speaking.is_speaking());
        assert!(!h.scheduler.enqueue(AudioSegment::new(0, vec![1])));
    }
}
