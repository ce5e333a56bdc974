use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::reassembler::EventRecord;
use crate::audio::AudioSegment;
use crate::events::{EventEmitter, SpeakingIndicator};
use crate::playback::PlaybackScheduler;
use crate::session::TranscriptSink;

const TEXT_TAG: &str = "TEXT::";
const AUDIO_TAG: &str = "AUDIO::";
const DONE_PAYLOAD: &str = "DONE";

/// Classified record payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent<'a> {
    /// Reply text fragment
    Text(&'a str),
    /// Base64 audio segment body
    Audio(&'a str),
    /// End of the streaming phase
    Done,
    /// Any other tag; ignored
    Unknown,
}

impl<'a> ReplyEvent<'a> {
    pub fn classify(payload: &'a str) -> Self {
        if let Some(token) = payload.strip_prefix(TEXT_TAG) {
            Self::Text(token)
        } else if let Some(encoded) = payload.strip_prefix(AUDIO_TAG) {
            Self::Audio(encoded)
        } else if payload == DONE_PAYLOAD {
            Self::Done
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Continue,
    /// `DONE` seen: stop consuming, let playback drain
    StreamComplete,
}

/// Dispatches records to the transcript and the playback queue
pub struct EventRouter {
    cancel: CancellationToken,
    transcript: TranscriptSink,
    scheduler: PlaybackScheduler,
    speaking: SpeakingIndicator,
    events: EventEmitter,
    next_sequence: u64,
    records_routed: usize,
}

impl EventRouter {
    pub fn new(
        cancel: CancellationToken,
        transcript: TranscriptSink,
        scheduler: PlaybackScheduler,
        speaking: SpeakingIndicator,
        events: EventEmitter,
    ) -> Self {
        Self {
            cancel,
            transcript,
            scheduler,
            speaking,
            events,
            next_sequence: 0,
            records_routed: 0,
        }
    }

    pub fn route(&mut self, record: &EventRecord) -> RouteOutcome {
        self.records_routed += 1;

        let Some(payload) = record.payload() else {
            debug!("Ignoring record without data line: {:?}", record.raw());
            return RouteOutcome::Continue;
        };

        match ReplyEvent::classify(&payload) {
            ReplyEvent::Text("") => debug!("Ignoring empty text record"),
            ReplyEvent::Text(token) => {
                self.transcript.append(token);
                self.events.transcript(self.transcript.text());
            }
            ReplyEvent::Audio(encoded) => self.route_audio(encoded),
            ReplyEvent::Done => {
                debug!("Stream complete after {} records", self.records_routed);
                return RouteOutcome::StreamComplete;
            }
            ReplyEvent::Unknown => {
                debug!("Ignoring record with unknown tag: {:.40}", payload);
            }
        }

        RouteOutcome::Continue
    }

    /// Segments handed to the scheduler so far
    pub fn segments_routed(&self) -> u64 {
        self.next_sequence
    }

    fn route_audio(&mut self, encoded: &str) {
        // Frames already buffered in the transport can outlive a cancel
        if self.cancel.is_cancelled() {
            debug!("Dropping audio record received after cancellation");
            return;
        }

        let segment = match AudioSegment::from_base64(self.next_sequence, encoded) {
            Ok(segment) => segment,
            Err(e) => {
                warn!("Skipping malformed audio record: {:#}", e);
                return;
            }
        };

        debug!(
            "Routing audio segment {} ({} bytes)",
            segment.sequence,
            segment.len()
        );

        self.next_sequence += 1;
        self.speaking.raise();
        self.scheduler.enqueue(segment);
    }
}
