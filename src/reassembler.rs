//! # Frame Reassembler
//!
//! ## Responsibility
//! Turn an arbitrary chunking of the `/api/process` response body into an
//! ordered sequence of [`StreamEvent`]s.
//!
//! ## Guarantees
//! - Chunk-boundary independent: the same bytes produce the same events no
//!   matter where the transport splits them, including inside a multi-byte
//!   character or inside the `data: ` prefix.
//! - Non-fatal frames: segments without the `data: ` prefix are dropped, and
//!   payloads that fail to parse are logged, counted and skipped.
//! - Order-preserving: events come out in the order their frames arrived.
//!
//! ## NOT Responsible For
//! - Interpreting events (see [`crate::dispatcher`])
//! - Cancellation (see [`crate::controller`])

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, trace, warn};

use crate::error::ClientError;
use crate::protocol::StreamEvent;

/// Frame delimiter of the backend's SSE stream.
pub const FRAME_DELIMITER: &str = "\n\n";
/// Prefix every meaningful frame starts with.
pub const DATA_PREFIX: &str = "data: ";

/// Raw response body as delivered by the transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;
/// Parsed events; a transport error is yielded once and ends the sequence.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ClientError>> + Send>>;

/// Incremental decoder for `data: <json>\n\n` frames.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    /// Trailing bytes of an incomplete UTF-8 sequence.
    undecoded: Vec<u8>,
    /// Decoded text not yet terminated by a delimiter.
    buffer: String,
    frames: usize,
    malformed: usize,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.decode(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find(FRAME_DELIMITER) {
            let segment: String = self.buffer.drain(..end + FRAME_DELIMITER.len()).collect();
            if let Some(event) = self.parse_segment(&segment[..end]) {
                events.push(event);
            }
        }
        events
    }

    /// End of stream. Returns the number of bytes that never formed a
    /// complete frame and were discarded.
    pub fn finish(self) -> usize {
        let dropped = self.buffer.len() + self.undecoded.len();
        if dropped > 0 {
            debug!(bytes = dropped, "discarding unterminated trailing segment");
        }
        dropped
    }

    /// Number of `data: ` frames seen so far, valid or not.
    pub fn frames_seen(&self) -> usize {
        self.frames
    }

    /// Number of `data: ` frames whose payload could not be parsed.
    pub fn malformed_frames(&self) -> usize {
        self.malformed
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.undecoded.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.undecoded);
        let mut rest: &[u8] = &bytes;

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.undecoded = after.to_vec();
                            return;
                        }
                        Some(n) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[n..];
                        }
                    }
                }
            }
        }
    }

    fn parse_segment(&mut self, segment: &str) -> Option<StreamEvent> {
        let Some(payload) = segment.strip_prefix(DATA_PREFIX) else {
            trace!(len = segment.len(), "skipping non-data segment");
            return None;
        };
        self.frames += 1;

        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => {
                debug!(frame = self.frames, "decoded frame");
                Some(event)
            }
            Err(e) => {
                self.malformed += 1;
                warn!(frame = self.frames, error = %e, "skipping malformed frame");
                None
            }
        }
    }
}

/// Lazily decode a response body into events.
///
/// The returned stream owns both the body and a fresh [`FrameReassembler`],
/// so it cannot be restarted; a new session needs a new body.
pub fn event_stream(mut chunks: ByteStream) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut reassembler = FrameReassembler::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in reassembler.feed(&bytes) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
        let malformed = reassembler.malformed_frames();
        if malformed > 0 {
            warn!(malformed, "stream finished with malformed frames");
        }
        reassembler.finish();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(s: &str) -> StreamEvent {
        StreamEvent::Status { data: s.to_string() }
    }

    #[test]
    fn test_single_chunk_two_frames() {
        let mut r = FrameReassembler::new();
        let events = r.feed(b"data: {\"type\":\"status\",\"data\":\"a\"}\n\ndata: {\"type\":\"status\",\"data\":\"b\"}\n\n");
        assert_eq!(events, vec![status("a"), status("b")]);
        assert_eq!(r.frames_seen(), 2);
    }

    #[test]
    fn test_frame_split_inside_prefix() {
        let mut r = FrameReassembler::new();
        assert!(r.feed(b"da").is_empty());
        assert!(r.feed(b"ta: {\"type\":\"status\",").is_empty());
        let events = r.feed(b"\"data\":\"ok\"}\n\n");
        assert_eq!(events, vec![status("ok")]);
    }

    #[test]
    fn test_split_between_delimiter_newlines() {
        let mut r = FrameReassembler::new();
        assert!(r.feed(b"data: {\"type\":\"status\",\"data\":\"x\"}\n").is_empty());
        assert_eq!(r.feed(b"\n"), vec![status("x")]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let frame = "data: {\"type\":\"status\",\"data\":\"正在思考\"}\n\n".as_bytes();
        // split in the middle of the first CJK character
        let cut = frame.iter().position(|b| *b >= 0x80).expect("non-ascii") + 1;
        let mut r = FrameReassembler::new();
        assert!(r.feed(&frame[..cut]).is_empty());
        assert_eq!(r.feed(&frame[cut..]), vec![status("正在思考")]);
    }

    #[test]
    fn test_non_data_segments_are_dropped() {
        let mut r = FrameReassembler::new();
        let events = r.feed(b": keep-alive\n\nevent: ping\n\ndata: {\"type\":\"status\",\"data\":\"y\"}\n\n");
        assert_eq!(events, vec![status("y")]);
        assert_eq!(r.malformed_frames(), 0);
    }

    #[test]
    fn test_malformed_json_is_skipped_and_counted() {
        let mut r = FrameReassembler::new();
        let events = r.feed(b"data: {not json\n\ndata: {\"type\":\"status\",\"data\":\"after\"}\n\n");
        assert_eq!(events, vec![status("after")]);
        assert_eq!(r.malformed_frames(), 1);
        assert_eq!(r.frames_seen(), 2);
    }

    #[test]
    fn test_prefix_without_space_is_not_a_frame() {
        let mut r = FrameReassembler::new();
        assert!(r.feed(b"data:{\"type\":\"status\",\"data\":\"z\"}\n\n").is_empty());
        assert_eq!(r.frames_seen(), 0);
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_fatal() {
        let mut r = FrameReassembler::new();
        let mut bytes = b"data: {\"type\":\"status\",\"data\":\"a".to_vec();
        bytes.push(0xFF);
        bytes.extend_from_slice(b"b\"}\n\n");
        let events = r.feed(&bytes);
        assert_eq!(events, vec![status("a\u{FFFD}b")]);
    }

    #[test]
    fn test_finish_reports_unterminated_tail() {
        let mut r = FrameReassembler::new();
        r.feed(b"data: {\"type\":\"status\",\"data\":\"never closed\"}");
        assert!(r.finish() > 0);
    }

    #[test]
    fn test_event_stream_yields_in_order_and_ends() {
        let chunks: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"status\",\"data\":\"1\"}\n\ndata: {\"ty")),
            Ok(Bytes::from_static(b"pe\":\"status\",\"data\":\"2\"}\n\n")),
        ];
        let body: ByteStream = Box::pin(futures_util::stream::iter(chunks));
        let events: Vec<_> = tokio_test::block_on(event_stream(body).collect::<Vec<_>>());
        let events: Vec<StreamEvent> = events.into_iter().map(|e| e.expect("ok")).collect();
        assert_eq!(events, vec![status("1"), status("2")]);
    }

    #[test]
    fn test_event_stream_stops_after_transport_error() {
        let chunks: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"status\",\"data\":\"1\"}\n\n")),
            Err(ClientError::Transport("reset".to_string())),
            Ok(Bytes::from_static(b"data: {\"type\":\"status\",\"data\":\"2\"}\n\n")),
        ];
        let body: ByteStream = Box::pin(futures_util::stream::iter(chunks));
        let items = tokio_test::block_on(event_stream(body).collect::<Vec<_>>());
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ClientError::Transport(_))));
    }
}
