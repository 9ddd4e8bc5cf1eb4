//! Incremental decoder for the `POST /chat` response body.
//!
//! The body is newline-delimited text where interesting lines look like
//! `data: {"content": "..."}` and the stream is closed by `data: [DONE]`.
//! Network chunks do not respect line boundaries, so the unterminated tail of
//! each chunk is carried into the next call. The carry holds raw bytes, which
//! also keeps multi-byte UTF-8 sequences intact across chunk splits.
//!
//! Bytes already searched for a newline are not searched again, and a line
//! longer than the cap is dropped up to its terminating newline.

use bytes::BytesMut;
use serde::Deserialize;
use tracing::trace;
use tracing::warn;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Full assistant text so far. Replaces, never extends, the previous one.
    Content(String),
    /// The server reported a failure while producing the reply.
    Error(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    content: Option<String>,
    error: Option<String>,
}

#[derive(Debug)]
pub struct StreamDecoder {
    carry: BytesMut,
    /// Prefix of `carry` known to contain no newline.
    scanned: usize,
    /// Set after an oversized line was dropped; input is skipped until the
    /// next newline.
    skipping: bool,
    max_line: usize,
    done: bool,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            carry: BytesMut::new(),
            scanned: 0,
            skipping: false,
            max_line: MAX_LINE_BYTES,
            done: false,
        }
    }

    /// Whether the sentinel has been seen. Input after it is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn consume(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        if self.done {
            trace!(len = chunk.len(), "ignoring data after end of stream");
            return frames;
        }
        let mut chunk = chunk;
        if self.skipping {
            let Some(pos) = chunk.iter().position(|b| *b == b'\n') else {
                return frames;
            };
            self.skipping = false;
            chunk = &chunk[pos + 1..];
        }
        self.carry.extend_from_slice(chunk);

        loop {
            let Some(offset) = self.carry[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = self.carry.len();
                break;
            };
            let pos = self.scanned + offset;
            self.scanned = 0;
            let line = self.carry.split_to(pos + 1);
            if let Some(frame) = decode_line(&line[..pos]) {
                let is_done = frame == StreamFrame::Done;
                frames.push(frame);
                if is_done {
                    self.done = true;
                    self.carry.clear();
                    return frames;
                }
            }
        }

        if self.carry.len() > self.max_line {
            warn!(len = self.carry.len(), "dropping oversized stream line");
            self.carry.clear();
            self.scanned = 0;
            self.skipping = true;
        }
        frames
    }

    /// Flushes a final line that was not newline-terminated when the
    /// transport closed.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        if self.done || self.carry.is_empty() {
            return Vec::new();
        }
        self.scanned = 0;
        let line = self.carry.split();
        match decode_line(&line) {
            Some(frame) => {
                self.done = frame == StreamFrame::Done;
                vec![frame]
            }
            None => Vec::new(),
        }
    }
}

fn decode_line(raw: &[u8]) -> Option<StreamFrame> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            warn!("skipping non-UTF-8 stream line: {e}");
            return None;
        }
    };
    let payload = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if payload == DONE_SENTINEL {
        return Some(StreamFrame::Done);
    }

    trace!("stream payload: {payload}");
    match serde_json::from_str::<ChatChunk>(payload) {
        Ok(ChatChunk {
            error: Some(message),
            ..
        }) => Some(StreamFrame::Error(message)),
        Ok(ChatChunk {
            content: Some(text),
            ..
        }) => Some(StreamFrame::Content(text)),
        Ok(_) => {
            warn!("skipping stream frame without content: {payload}");
            None
        }
        Err(e) => {
            warn!("skipping malformed stream frame: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BODY: &str = concat!(
        "data: {\"content\":\"Hel\"}\n\n",
        "data: {\"content\":\"Hello\"}\n\n",
        "data: {\"content\":\"Hello, wörld\"}\n\n",
        "data: [DONE]\n\n",
    );

    fn content(text: &str) -> StreamFrame {
        StreamFrame::Content(text.to_string())
    }

    fn decode_in_chunks(body: &[u8], sizes: &[usize]) -> Vec<StreamFrame> {
        let mut decoder = StreamDecoder::new();
        let mut frames = Vec::new();
        let mut rest = body;
        let mut sizes = sizes.iter().cycle();
        while !rest.is_empty() {
            let n = (*sizes.next().unwrap_or(&1)).min(rest.len()).max(1);
            let (head, tail) = rest.split_at(n);
            frames.extend(decoder.consume(head));
            rest = tail;
        }
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn single_chunk() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(
            decoder.consume(BODY.as_bytes()),
            vec![
                content("Hel"),
                content("Hello"),
                content("Hello, wörld"),
                StreamFrame::Done,
            ]
        );
        assert!(decoder.is_done());
    }

    #[test]
    fn arbitrary_splits_match_single_chunk() {
        let expected = StreamDecoder::new().consume(BODY.as_bytes());
        for sizes in [&[1][..], &[2], &[3, 7], &[5, 1, 11], &[16], &[29, 2]] {
            assert_eq!(
                decode_in_chunks(BODY.as_bytes(), sizes),
                expected,
                "split sizes {sizes:?}"
            );
        }
    }

    #[test]
    fn oversized_line_is_dropped_through_its_newline() {
        let mut decoder = StreamDecoder {
            max_line: 16,
            ..StreamDecoder::new()
        };
        assert_eq!(decoder.consume(b"data: {\"content\":\"aaaaaaaa"), vec![]);
        assert!(decoder.carry.is_empty());
        assert_eq!(decoder.consume(b"aaaaaaaaaaaaaaaa"), vec![]);
        assert!(decoder.carry.is_empty());
        assert_eq!(
            decoder.consume(b"aa\"}\ndata: {\"content\":\"ok\"}\n"),
            vec![content("ok")]
        );
        assert_eq!(decoder.finish(), vec![]);
    }

    #[test]
    fn scan_resumes_where_previous_chunk_ended() {
        let mut decoder = StreamDecoder::new();
        for byte in b"data: {\"content\":\"slow\"}" {
            assert_eq!(decoder.consume(std::slice::from_ref(byte)), vec![]);
            assert_eq!(decoder.scanned, decoder.carry.len());
        }
        assert_eq!(decoder.consume(b"\n"), vec![content("slow")]);
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn partial_line_is_held_until_terminated() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.consume(b"data: {\"content\":"), vec![]);
        assert_eq!(decoder.consume(b"\"Hi\"}"), vec![]);
        assert_eq!(decoder.consume(b"\n"), vec![content("Hi")]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mut decoder = StreamDecoder::new();
        let frames = decoder.consume(
            b"data: {\"content\":\"a\"}\ndata: {not json\n: keep-alive\nevent: message\ndata: {}\ndata: {\"content\":\"ab\"}\n",
        );
        assert_eq!(frames, vec![content("a"), content("ab")]);
    }

    #[test]
    fn sentinel_stops_decoding() {
        let mut decoder = StreamDecoder::new();
        let frames = decoder.consume(b"data: [DONE]\ndata: {\"content\":\"late\"}\n");
        assert_eq!(frames, vec![StreamFrame::Done]);
        assert_eq!(decoder.consume(b"data: {\"content\":\"later\"}\n"), vec![]);
        assert_eq!(decoder.finish(), vec![]);
    }

    #[test]
    fn crlf_and_missing_space_are_accepted() {
        let mut decoder = StreamDecoder::new();
        let frames = decoder.consume(b"data:{\"content\":\"x\"}\r\ndata:  [DONE]\r\n");
        assert_eq!(frames, vec![content("x"), StreamFrame::Done]);
    }

    #[test]
    fn server_error_frame() {
        let mut decoder = StreamDecoder::new();
        let frames = decoder.consume(b"data: {\"error\": \"model unavailable\"}\n");
        assert_eq!(
            frames,
            vec![StreamFrame::Error("model unavailable".to_string())]
        );
    }

    #[test]
    fn finish_flushes_unterminated_tail() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.consume(b"data: {\"content\":\"tail\"}"), vec![]);
        assert_eq!(decoder.finish(), vec![content("tail")]);
        assert_eq!(decoder.finish(), vec![]);
    }
}
