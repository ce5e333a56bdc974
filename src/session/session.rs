use super::cancel::{CancelReason, CancellationController};
use super::config::SessionConfig;
use super::state::{Session, SessionState};
use super::stats::SessionStats;
use super::transcript::TranscriptSink;
use crate::audio::CapturedAudio;
use crate::events::{EventEmitter, SessionEvent, SessionStatus, SpeakingIndicator};
use crate::playback::{AudioRenderer, PlaybackScheduler};
use crate::stream::{records, EventRouter, ResponseTransport, RouteOutcome};
use anyhow::Result;
use chrono::Utc;
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Everything that belongs to one session; dropped when the next starts
struct ActiveSession {
    session: Arc<Session>,
    transcript: TranscriptSink,
    scheduler: PlaybackScheduler,
    speaking: SpeakingIndicator,
    controller: Arc<CancellationController>,
    events: EventEmitter,
    drive_task: Option<JoinHandle<()>>,
}

/// Owns the current session and drives it from upload to drained playback
pub struct SessionOrchestrator {
    /// Timeouts applied to every session
    config: SessionConfig,

    /// Backend connection
    transport: Arc<dyn ResponseTransport>,

    /// Output device shared by successive sessions
    renderer: Arc<dyn AudioRenderer>,

    /// UI event channel, if anyone listens
    events_tx: Option<mpsc::UnboundedSender<SessionEvent>>,

    /// The current session (at most one)
    current: Mutex<Option<ActiveSession>>,
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn ResponseTransport>,
        renderer: Arc<dyn AudioRenderer>,
    ) -> Self {
        info!(
            "Session orchestrator ready (transport: {}, renderer: {})",
            transport.name(),
            renderer.name()
        );

        Self {
            config,
            transport,
            renderer,
            events_tx: None,
            current: Mutex::new(None),
        }
    }

    /// Deliver UI events to `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events_tx = Some(tx);
        self
    }

    /// Start a new session in the capturing state
    ///
    /// A previous session that has not finished is cancelled first.
    pub async fn start(&self) -> String {
        let mut current = self.current.lock().await;
        let active = self.replace_session(&mut current);
        active.session.id().to_string()
    }

    /// Upload captured audio and consume the reply in the background
    ///
    /// Uses the session opened by `start`; opens one if there is none or it
    /// is already past capturing.
    pub async fn submit(&self, audio: CapturedAudio) -> Result<String> {
        let mut current = self.current.lock().await;

        let capturing = current
            .as_ref()
            .is_some_and(|a| a.session.state() == SessionState::Capturing);
        if !capturing {
            self.replace_session(&mut current);
        }

        let Some(active) = current.as_mut() else {
            anyhow::bail!("No session to submit to");
        };

        if !active.session.advance(SessionState::Uploading) {
            anyhow::bail!("Session {} can no longer accept audio", active.session.id());
        }

        info!(
            "Session {}: uploading {} bytes",
            active.session.id(),
            audio.len()
        );
        active.events.status(SessionStatus::Uploading);

        let router = EventRouter::new(
            active.session.cancel_token().clone(),
            active.transcript.clone(),
            active.scheduler.clone(),
            active.speaking.clone(),
            active.events.clone(),
        );

        let ctx = DriveContext {
            config: self.config.clone(),
            session: Arc::clone(&active.session),
            transport: Arc::clone(&self.transport),
            router,
            scheduler: active.scheduler.clone(),
            controller: Arc::clone(&active.controller),
            events: active.events.clone(),
        };

        active.drive_task = Some(tokio::spawn(drive_session(ctx, audio)));

        Ok(active.session.id().to_string())
    }

    /// Cancel the current session
    ///
    /// Returns the session id, or None if there is no session.
    pub async fn cancel(&self) -> Option<String> {
        let current = self.current.lock().await;
        let active = current.as_ref()?;

        active.controller.cancel(CancelReason::User);
        Some(active.session.id().to_string())
    }

    /// Wait for the current session's stream and playback to finish
    ///
    /// Returns the state the session ended in, or None if there is no
    /// submitted session.
    pub async fn wait(&self) -> Option<SessionState> {
        let (task, session) = {
            let mut current = self.current.lock().await;
            let active = current.as_mut()?;
            (active.drive_task.take()?, Arc::clone(&active.session))
        };

        if let Err(e) = task.await {
            error!("Session task panicked: {}", e);
        }

        Some(session.state())
    }

    /// Current session snapshot
    pub async fn stats(&self) -> Option<SessionStats> {
        let current = self.current.lock().await;
        let active = current.as_ref()?;

        let duration = Utc::now().signed_duration_since(active.session.started_at());

        Some(SessionStats {
            session_id: active.session.id().to_string(),
            state: active.session.state(),
            started_at: active.session.started_at(),
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            transcript_len: active.transcript.len(),
            segments_received: active.scheduler.accepted(),
            segments_played: active.scheduler.played(),
            render_failures: active.scheduler.failed(),
            speaking: active.speaking.is_speaking(),
        })
    }

    /// Current session id and reply text so far
    pub async fn transcript(&self) -> Option<(String, String)> {
        let current = self.current.lock().await;
        let active = current.as_ref()?;

        Some((active.session.id().to_string(), active.transcript.text()))
    }

    fn replace_session<'a>(&self, current: &'a mut Option<ActiveSession>) -> &'a mut ActiveSession {
        if let Some(previous) = current.take() {
            if !previous.session.state().is_terminal() {
                previous.controller.cancel(CancelReason::Superseded);
            }
        }

        let session = Arc::new(Session::new());
        let events = match &self.events_tx {
            Some(tx) => EventEmitter::new(session.id(), tx.clone()),
            None => EventEmitter::disabled(session.id()),
        };
        let speaking = SpeakingIndicator::new(events.clone());
        let scheduler = PlaybackScheduler::new(
            Arc::clone(&self.renderer),
            session.cancel_token().clone(),
            speaking.clone(),
        );
        let controller = Arc::new(CancellationController::new(
            Arc::clone(&session),
            scheduler.clone(),
            speaking.clone(),
            Arc::clone(&self.transport),
            events.clone(),
        ));

        info!("Starting session: {}", session.id());
        session.advance(SessionState::Capturing);
        events.status(SessionStatus::Listening);

        current.insert(ActiveSession {
            session,
            transcript: TranscriptSink::new(),
            scheduler,
            speaking,
            controller,
            events,
            drive_task: None,
        })
    }
}

struct DriveContext {
    config: SessionConfig,
    session: Arc<Session>,
    transport: Arc<dyn ResponseTransport>,
    router: EventRouter,
    scheduler: PlaybackScheduler,
    controller: Arc<CancellationController>,
    events: EventEmitter,
}

/// Upload, consume the stream, then let playback drain
///
/// Any transport failure goes through the cancellation controller, the
/// same path as a user stop.
async fn drive_session(mut ctx: DriveContext, audio: CapturedAudio) {
    let cancel = ctx.session.cancel_token().clone();
    let session_id = ctx.session.id().to_string();

    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        opened = timeout(ctx.config.open_timeout, ctx.transport.submit(audio)) => opened,
    };

    let frames = match opened {
        Ok(Ok(frames)) => frames,
        Ok(Err(e)) => {
            error!("Session {}: submit failed: {:#}", session_id, e);
            ctx.controller.cancel(CancelReason::TransportFailure);
            return;
        }
        Err(_) => {
            error!(
                "Session {}: no response stream after {:?}",
                session_id, ctx.config.open_timeout
            );
            ctx.controller.cancel(CancelReason::TransportFailure);
            return;
        }
    };

    if !ctx.session.advance(SessionState::Streaming) {
        return;
    }
    info!("Session {}: response stream open", session_id);
    ctx.events.status(SessionStatus::Responding);

    let incoming = records(frames, cancel.clone());
    futures::pin_mut!(incoming);

    loop {
        let next = match timeout(ctx.config.frame_timeout, incoming.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!(
                    "Session {}: no frame for {:?}, giving up",
                    session_id, ctx.config.frame_timeout
                );
                ctx.controller.cancel(CancelReason::TransportFailure);
                return;
            }
        };

        match next {
            Some(Ok(record)) => {
                if ctx.router.route(&record) == RouteOutcome::StreamComplete {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("Session {}: stream failed: {:#}", session_id, e);
                ctx.controller.cancel(CancelReason::TransportFailure);
                return;
            }
            None => break,
        }
    }

    if cancel.is_cancelled() {
        return;
    }

    info!(
        "Session {}: streaming finished ({} segments), waiting for playback",
        session_id,
        ctx.router.segments_routed()
    );

    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        () = ctx.scheduler.wait_idle() => {}
    }

    if ctx.session.advance(SessionState::Completed) {
        info!("Session {} completed", session_id);
        ctx.events.status(SessionStatus::Idle);
    }
}
