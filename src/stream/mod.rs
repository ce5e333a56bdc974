//! Reply stream consumption
//!
//! transport (frames) → reassembler (records) → router (transcript / playback)

pub mod reassembler;
pub mod router;
pub mod transport;

pub use reassembler::{records, EventRecord, FrameReassembler};
pub use router::{EventRouter, ReplyEvent, RouteOutcome};
pub use transport::{FrameStream, HttpTransport, ResponseTransport};
