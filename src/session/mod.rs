//! Session lifecycle
//!
//! This module provides the `SessionOrchestrator`, which owns one
//! capture-to-reply cycle at a time:
//! - Uploading the captured utterance
//! - Consuming the reply stream (text to the transcript, audio to playback)
//! - Cancelling on user stop, supersession or transport failure
//! - Session statistics and state management

mod cancel;
mod config;
mod session;
mod state;
mod stats;
mod transcript;

pub use cancel::{CancelReason, CancellationController};
pub use config::SessionConfig;
pub use session::SessionOrchestrator;
pub use state::{Session, SessionState};
pub use stats::SessionStats;
pub use transcript::TranscriptSink;
