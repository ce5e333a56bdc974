//! Event-stream frame reassembly
//!
//! The transport delivers frames with no alignment to record boundaries:
//! a record, a UTF-8 character, or the blank-line separator itself may be
//! split across two frames. `FrameReassembler` keeps the unterminated tail
//! between frames and only decodes a record once its separator has been
//! seen.

use anyhow::Result;
use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Prefix of every meaningful line in a record
const DATA_PREFIX: &str = "data:";

/// One complete record, as delimited by a blank line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    raw: String,
}

impl EventRecord {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Record text exactly as received, separator excluded
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Payload with the `data:` line prefixes stripped
    ///
    /// Multiple data lines are joined with `\n`. Returns `None` when the
    /// record has no data line at all (comments, `event:` lines only).
    pub fn payload(&self) -> Option<String> {
        let mut payload: Option<String> = None;

        for line in self.raw.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let rest = rest.strip_prefix(' ').unwrap_or(rest);

            match payload.as_mut() {
                Some(p) => {
                    p.push('\n');
                    p.push_str(rest);
                }
                None => payload = Some(rest.to_string()),
            }
        }

        payload
    }
}

/// Incremental record splitter
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: BytesMut,
    /// Bytes before this offset are known not to start a separator
    scan_from: usize,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame, returning every record it completed, in order
    pub fn push(&mut self, frame: &[u8]) -> Vec<EventRecord> {
        self.buffer.extend_from_slice(frame);

        let mut records = Vec::new();
        while let Some((end, separator_len)) = find_separator(&self.buffer, self.scan_from) {
            let body = self.buffer.split_to(end);
            self.buffer.advance(separator_len);
            self.scan_from = 0;

            let raw = String::from_utf8_lossy(&body).into_owned();
            if raw.is_empty() {
                continue;
            }
            records.push(EventRecord { raw });
        }

        // A separator is at most 3 bytes; re-scan only the tail that could start one
        self.scan_from = self.buffer.len().saturating_sub(2);

        records
    }

    /// Bytes of the unterminated record currently held
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial record
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.scan_from = 0;
        dropped
    }
}

/// Locate the first blank line: `\n\n` or `\n\r\n`
///
/// Returns the record length (up to the first newline) and the separator
/// length.
fn find_separator(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buffer.len() {
        if buffer[i] == b'\n' {
            match buffer.get(i + 1) {
                Some(b'\n') => return Some((i, 2)),
                Some(b'\r') if buffer.get(i + 2) == Some(&b'\n') => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

struct RecordStream<S> {
    frames: S,
    reassembler: FrameReassembler,
    ready: VecDeque<EventRecord>,
    cancel: CancellationToken,
    finished: bool,
}

/// Turn a frame source into a lazy, ordered sequence of records
///
/// The sequence ends when the source ends, when the source fails (the
/// error is yielded once, then the sequence ends), or when `cancel` fires.
/// In every case a trailing partial record is discarded, never emitted.
/// Cancellation is checked before each frame pull and before each record
/// is handed out, so nothing is yielded after `cancel` fires.
pub fn records<S>(frames: S, cancel: CancellationToken) -> impl Stream<Item = Result<EventRecord>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = RecordStream {
        frames,
        reassembler: FrameReassembler::new(),
        ready: VecDeque::new(),
        cancel,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if state.cancel.is_cancelled() {
                let dropped = state.reassembler.discard();
                state.ready.clear();
                debug!("Record stream cancelled ({} buffered bytes dropped)", dropped);
                return None;
            }

            if let Some(record) = state.ready.pop_front() {
                return Some((Ok(record), state));
            }

            let next = tokio::select! {
                biased;
                () = state.cancel.cancelled() => continue,
                next = state.frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => {
                    let completed = state.reassembler.push(&frame);
                    state.ready.extend(completed);
                }
                Some(Err(e)) => {
                    let dropped = state.reassembler.discard();
                    state.finished = true;
                    warn!("Frame source failed ({} buffered bytes dropped): {:#}", dropped, e);
                    return Some((Err(e), state));
                }
                None => {
                    let dropped = state.reassembler.discard();
                    if dropped > 0 {
                        debug!("Stream ended inside a record ({} bytes dropped)", dropped);
                    }
                    state.finished = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_all(frames: &[&str]) -> Vec<String> {
        let mut reassembler = FrameReassembler::new();
        frames
            .iter()
            .flat_map(|f| reassembler.push(f.as_bytes()))
            .map(|r| r.payload().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_single_frame_many_records() {
        let payloads = push_all(&["data: TEXT::a\n\ndata: TEXT::b\n\ndata: DONE\n\n"]);
        assert_eq!(payloads, vec!["TEXT::a", "TEXT::b", "DONE"]);
    }

    #[test]
    fn test_record_split_across_frames() {
        let payloads = push_all(&["data: TEXT::Hel", "lo\n\ndata: AUDIO::QUk1", "\n\n"]);
        assert_eq!(payloads, vec!["TEXT::Hello", "AUDIO::QUk1"]);
    }

    #[test]
    fn test_separator_split_across_frames() {
        let mut reassembler = FrameReassembler::new();

        assert!(reassembler.push(b"data: TEXT::one\n").is_empty());
        let records = reassembler.push(b"\ndata: TEXT::two\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload().as_deref(), Some("TEXT::one"));

        let records = reassembler.push(b"\n");
        assert_eq!(records[0].payload().as_deref(), Some("TEXT::two"));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_crlf_separator() {
        let payloads = push_all(&["data: TEXT::x\r\n\r", "\ndata: DONE\r\n\r\n"]);
        assert_eq!(payloads, vec!["TEXT::x", "DONE"]);
    }

    #[test]
    fn test_multibyte_character_split() {
        let text = "data: TEXT::caf\u{e9}\n\n".as_bytes();
        let split = text.len() - 3; // inside the two-byte é
        let mut reassembler = FrameReassembler::new();

        assert!(reassembler.push(&text[..split]).is_empty());
        let records = reassembler.push(&text[split..]);
        assert_eq!(records[0].payload().as_deref(), Some("TEXT::caf\u{e9}"));
    }

    #[test]
    fn test_chunking_does_not_change_records() {
        let wire = "data: TEXT::*User*: hi\n\n: keepalive\n\ndata: TEXT::Hello there.\n\ndata: AUDIO::QUk1\n\ndata: DONE\n\n";
        let expected = push_all(&[wire]);
        assert_eq!(expected.len(), 5);

        let bytes = wire.as_bytes();
        for first in 1..bytes.len() {
            for second in first..bytes.len() {
                let mut reassembler = FrameReassembler::new();
                let mut got = Vec::new();
                for part in [&bytes[..first], &bytes[first..second], &bytes[second..]] {
                    got.extend(
                        reassembler
                            .push(part)
                            .into_iter()
                            .map(|r| r.payload().unwrap_or_default()),
                    );
                }
                assert_eq!(got, expected, "split at {} and {}", first, second);
            }
        }
    }

    #[test]
    fn test_payload_strips_prefix_and_joins_lines() {
        let record = EventRecord::new("event: reply\ndata: TEXT::a\ndata:b");
        assert_eq!(record.payload().as_deref(), Some("TEXT::a\nb"));

        let comment = EventRecord::new(": ping");
        assert_eq!(comment.payload(), None);
    }

    #[test]
    fn test_payload_keeps_token_whitespace() {
        let record = EventRecord::new("data: TEXT:: world ");
        assert_eq!(record.payload().as_deref(), Some("TEXT:: world "));
    }

    fn frames(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_records_stream_drops_trailing_partial() {
        let source = frames(&["data: TEXT::a\n\ndata: TEXT::unfinished"]);
        let got: Vec<_> = records(source, CancellationToken::new()).collect().await;

        assert_eq!(got.len(), 1);
        assert_eq!(got[0].as_ref().unwrap().payload().as_deref(), Some("TEXT::a"));
    }

    #[tokio::test]
    async fn test_records_stream_yields_error_then_ends() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"data: TEXT::a\n\ndata: TEXT::b")),
            Err(anyhow::anyhow!("connection reset")),
            Ok(Bytes::from_static(b"\n\n")),
        ]);
        let got: Vec<_> = records(source, CancellationToken::new()).collect().await;

        assert_eq!(got.len(), 2);
        assert!(got[0].is_ok());
        assert!(got[1].is_err());
    }

    #[tokio::test]
    async fn test_records_stream_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let source = frames(&["data: TEXT::a\n\ndata: TEXT::b\n\n", "data: TEXT::c\n\n"]);
        let mut stream = Box::pin(records(source, cancel.clone()));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload().as_deref(), Some("TEXT::a"));

        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_records_stream_cancel_while_waiting_for_frame() {
        let cancel = CancellationToken::new();
        let pending = stream::pending::<Result<Bytes>>();
        let mut stream = Box::pin(records(pending, cancel.clone()));

        let canceller = cancel.clone();
        tokio::spawn(async move { canceller.cancel() });

        assert!(stream.next().await.is_none());
    }
}
