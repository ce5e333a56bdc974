pub mod audio;
pub mod config;
pub mod events;
pub mod http;
pub mod playback;
pub mod session;
pub mod stream;

mod sync;

pub use audio::{decode_segment, AudioSegment, CapturedAudio, DecodedAudio};
pub use config::Config;
pub use events::{SessionEvent, SessionEventKind, SessionStatus};
pub use http::{create_router, AppState};
pub use playback::{AudioRenderer, PacedRenderer, PlaybackOutput, PlaybackScheduler, RendererFactory};
pub use session::{CancelReason, SessionConfig, SessionOrchestrator, SessionState, SessionStats};
pub use stream::{EventRecord, FrameReassembler, HttpTransport, ResponseTransport};
