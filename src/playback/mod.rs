//! Reply speech playback
//!
//! - `PlaybackScheduler`: serial, gapless FIFO over one session's segments
//! - `AudioRenderer`: the output device behind it (paced, WAV files, speaker)

pub mod renderer;
pub mod scheduler;
pub mod wav;

#[cfg(feature = "speaker")]
pub mod speaker;

#[cfg(test)]
pub(crate) mod test_support;

pub use renderer::{AudioRenderer, PacedRenderer, PlaybackOutput, RendererFactory};
pub use scheduler::{PlaybackScheduler, PlaybackState};
pub use wav::WavRenderer;

#[cfg(feature = "speaker")]
pub use speaker::SpeakerRenderer;
