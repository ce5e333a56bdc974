use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Snapshot of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub state: SessionState,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Seconds since the session started
    pub duration_secs: f64,

    /// Length of the reply text so far, in bytes
    pub transcript_len: usize,

    /// Audio segments accepted into the playback queue
    pub segments_received: u64,

    /// Segments whose render has finished (including failed renders)
    pub segments_played: usize,

    /// Segments that failed to render
    pub render_failures: usize,

    /// Whether speech is being produced right now
    pub speaking: bool,
}
