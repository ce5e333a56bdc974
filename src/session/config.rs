use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by every session of an orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long the backend may take to open the reply stream
    /// Default: 30 seconds (it transcribes the utterance first)
    pub open_timeout: Duration,

    /// Longest allowed silence between two frames while streaming
    /// Default: 60 seconds
    pub frame_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(30),
            frame_timeout: Duration::from_secs(60),
        }
    }
}
