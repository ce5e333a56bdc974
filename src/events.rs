//! UI-facing session events
//!
//! The presentation layer is not part of this crate. It receives:
//! - status transitions (Listening, Uploading, Responding, Idle, Stopped)
//! - the full accumulated reply text after every token
//! - speaking on/off changes
//!
//! Every event carries the id of the session that produced it.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use crate::sync::lock;

/// Status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Listening,
    Uploading,
    Responding,
    Idle,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    Status { status: SessionStatus },
    TranscriptUpdate { text: String },
    SpeakingChanged { speaking: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

/// Per-session event publisher
///
/// A dropped receiver is not an error; the UI may simply not be listening.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    session_id: Arc<str>,
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventEmitter {
    pub fn new(session_id: &str, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            session_id: Arc::from(session_id),
            tx: Some(tx),
        }
    }

    /// Emitter that drops everything (tests, headless use)
    pub fn disabled(session_id: &str) -> Self {
        Self {
            session_id: Arc::from(session_id),
            tx: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, kind: SessionEventKind) {
        debug!("session {} event: {:?}", self.session_id, kind);

        if let Some(tx) = &self.tx {
            let _ = tx.send(SessionEvent {
                session_id: self.session_id.to_string(),
                kind,
            });
        }
    }

    pub fn status(&self, status: SessionStatus) {
        self.emit(SessionEventKind::Status { status });
    }

    pub fn transcript(&self, text: String) {
        self.emit(SessionEventKind::TranscriptUpdate { text });
    }
}

#[derive(Debug, Default)]
struct SpeakingState {
    speaking: bool,
    closed: bool,
}

/// "Producing speech" indicator
///
/// Emits `SpeakingChanged` only on an actual change. Once closed (session
/// cancelled) it stays off, so a late `raise` from an in-flight record
/// cannot turn it back on.
#[derive(Debug, Clone)]
pub struct SpeakingIndicator {
    state: Arc<Mutex<SpeakingState>>,
    events: EventEmitter,
}

impl SpeakingIndicator {
    pub fn new(events: EventEmitter) -> Self {
        Self {
            state: Arc::new(Mutex::new(SpeakingState::default())),
            events,
        }
    }

    pub fn raise(&self) {
        self.set(true);
    }

    pub fn lower(&self) {
        self.set(false);
    }

    /// Turn the indicator off for good
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        if state.speaking {
            state.speaking = false;
            self.events
                .emit(SessionEventKind::SpeakingChanged { speaking: false });
        }
    }

    pub fn is_speaking(&self) -> bool {
        lock(&self.state).speaking
    }

    fn set(&self, speaking: bool) {
        let mut state = lock(&self.state);
        if state.closed || state.speaking == speaking {
            return;
        }
        state.speaking = speaking;
        // Emitted under the lock so the UI sees changes in the order they happened
        self.events
            .emit(SessionEventKind::SpeakingChanged { speaking });
    }
}
