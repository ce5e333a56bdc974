pub mod capture;
pub mod decode;
pub mod segment;

pub use capture::CapturedAudio;
pub use decode::{decode_segment, DecodedAudio};
pub use segment::AudioSegment;
