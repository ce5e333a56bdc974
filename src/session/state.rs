use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::sync::lock;

/// Lifecycle of one capture-to-reply cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Capturing,
    Uploading,
    Streaming,
    Cancelled,
    Completed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Capturing => 1,
            Self::Uploading => 2,
            Self::Streaming => 3,
            Self::Cancelled | Self::Completed => 4,
        }
    }
}

/// One session
///
/// Other components only see the cancellation token (by clone); state
/// changes go through the orchestrator, and `Cancelled` only through the
/// cancellation controller.
#[derive(Debug)]
pub struct Session {
    id: String,
    started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: format!("session-{}", uuid::Uuid::new_v4()),
            started_at: Utc::now(),
            state: Mutex::new(SessionState::Idle),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Move forward in the lifecycle
    ///
    /// Terminal states are final and states never go backwards; returns
    /// false when the transition was refused.
    pub(crate) fn advance(&self, to: SessionState) -> bool {
        let mut state = lock(&self.state);
        let from = *state;

        if from.is_terminal() || to.rank() <= from.rank() {
            debug!("Session {}: refusing {:?} -> {:?}", self.id, from, to);
            return false;
        }
        if to == SessionState::Completed && self.cancel.is_cancelled() {
            return false;
        }

        debug!("Session {}: {:?} -> {:?}", self.id, from, to);
        *state = to;
        true
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
