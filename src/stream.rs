//! Incremental parser for `data:`-framed completion streams.
//!
//! Network chunks do not line up with frame boundaries, so bytes are held in a
//! line buffer until a newline arrives. The parser stops for good at the
//! first `[DONE]` sentinel or `finish_reason`, whatever bytes follow.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tracing::{debug, trace};

use crate::llm_wrapper::{ByteStream, UpstreamError};
use crate::schemas::llm_frame::StreamFrame;

const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Line-buffering frame decoder, one per upstream response.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` or a finish reason has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one network chunk, returning the text deltas it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        if self.finished {
            return deltas;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.handle_line(&line[..newline], &mut deltas);
            if self.finished {
                self.buffer.clear();
                break;
            }
        }
        deltas
    }

    /// Process a trailing line left without a newline at end of stream.
    pub fn flush(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();
        if !self.finished && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.handle_line(&line, &mut deltas);
        }
        self.buffer.clear();
        deltas
    }

    fn handle_line(&mut self, raw: &[u8], deltas: &mut Vec<String>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim();

        if payload == DONE_SENTINEL {
            self.finished = true;
            return;
        }

        let frame = match serde_json::from_str::<StreamFrame>(payload) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(error = %e, "ignoring unparsable frame");
                return;
            }
        };

        let Some(choice) = frame.choices.into_iter().next() else {
            return;
        };

        if let Some(content) = choice.delta.and_then(|d| d.content) {
            if !content.is_empty() {
                deltas.push(normalize_line_endings(&content));
            }
        }

        if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
            debug!(finish_reason = %reason, "upstream finished");
            self.finished = true;
        }
    }
}

/// Rewrite `\r\n` and lone `\r` as `\n`.
///
/// SSE field values cannot carry carriage returns. Deltas are cleaned here so
/// streamed, returned and stored text agree.
pub fn normalize_line_endings(text: &str) -> String {
    if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text.to_string()
    }
}

/// Lazy sequence of text deltas read from an upstream byte stream.
///
/// Yields deltas in arrival order, then ends on the sentinel, a finish
/// reason, or the end of the byte stream. A transport error is yielded once
/// and ends the sequence.
pub struct DeltaStream {
    inner: Option<ByteStream>,
    decoder: FrameDecoder,
    pending: VecDeque<String>,
}

impl DeltaStream {
    pub fn new(inner: ByteStream) -> Self {
        DeltaStream {
            inner: Some(inner),
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
        }
    }
}

impl Stream for DeltaStream {
    type Item = Result<String, UpstreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(delta) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(delta)));
            }

            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(this.decoder.feed(&chunk));
                    if this.decoder.is_finished() {
                        // Dropping the body releases the upstream connection.
                        this.inner = None;
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.inner = None;
                    this.pending.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    this.pending.extend(this.decoder.flush());
                }
            }
        }
    }
}

/// Wrap already-received chunks as a [`ByteStream`].
pub fn byte_stream_from_chunks<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Result<Bytes, UpstreamError>>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures_util::stream::iter(chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    const HEL_FRAME: &[u8] = b"data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}\n\n";

    async fn collect_text(mut stream: DeltaStream) -> Result<String, UpstreamError> {
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [ { "delta": { "content": content } } ] })
        )
    }

    #[test]
    fn delta_survives_any_split_point() {
        for split in 0..=HEL_FRAME.len() {
            let mut decoder = FrameDecoder::new();
            let mut deltas = decoder.feed(&HEL_FRAME[..split]);
            deltas.extend(decoder.feed(&HEL_FRAME[split..]));
            deltas.extend(decoder.flush());
            assert_eq!(deltas, vec!["hel".to_string()], "split at {split}");
        }
    }

    #[test]
    fn delta_survives_byte_by_byte_delivery() {
        let mut decoder = FrameDecoder::new();
        let mut deltas = Vec::new();
        for byte in HEL_FRAME {
            deltas.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(deltas, vec!["hel".to_string()]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let body = frame("héllo ✓");
        let bytes = body.as_bytes();
        let check = body.find('✓').unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        let mut deltas = decoder.feed(&bytes[..check]);
        deltas.extend(decoder.feed(&bytes[check..]));
        assert_eq!(deltas, vec!["héllo ✓".to_string()]);
    }

    #[test]
    fn several_frames_in_one_chunk_keep_order() {
        let body = format!("{}{}{}", frame("a"), frame("b"), frame("c"));
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(body.as_bytes()), vec!["a", "b", "c"]);
    }

    #[test]
    fn nothing_after_done_is_processed() {
        let body = format!("{}data: [DONE]\n\n{}", frame("first"), frame("late"));
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(body.as_bytes()), vec!["first"]);
        assert!(decoder.is_finished());
        assert!(decoder.feed(frame("later").as_bytes()).is_empty());
        assert!(decoder.flush().is_empty());
    }

    #[test]
    fn finish_reason_ends_stream_after_its_content() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"end\"},\"finish_reason\":\"stop\"}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        );
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(body.as_bytes()), vec!["end"]);
        assert!(decoder.is_finished());
    }

    #[test]
    fn empty_finish_reason_does_not_end_stream() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"},\"finish_reason\":\"\"}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        );
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(body.as_bytes()), vec!["a", "b"]);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn carriage_returns_in_content_become_newlines() {
        let mut decoder = FrameDecoder::new();
        let deltas = decoder.feed(frame("one\r\ntwo\rthree").as_bytes());
        assert_eq!(deltas, vec!["one\ntwo\nthree"]);
        assert_eq!(normalize_line_endings("plain"), "plain");
    }

    #[test]
    fn noise_lines_are_skipped() {
        let body = concat!(
            ": keep-alive comment\n",
            "event: message\n",
            "\r\n",
            "data: {not json}\n",
            "data: {\"id\":\"x\"}\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "data: {\"choices\":[{\"delta\":null,\"finish_reason\":null}]}\n",
            "data:{\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\r\n",
        );
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(body.as_bytes()), vec!["ok"]);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn unterminated_last_line_is_flushed() {
        let body = frame("tail");
        let trimmed = body.trim_end();
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(trimmed.as_bytes()).is_empty());
        assert_eq!(decoder.flush(), vec!["tail"]);
    }

    #[tokio::test]
    async fn delta_stream_collects_until_done() {
        let chunks = vec![
            Ok(Bytes::from(frame("Hello"))),
            Ok(Bytes::from(format!("{}data: [DO", frame(", world")))),
            Ok(Bytes::from("NE]\n\n")),
            Ok(Bytes::from(frame("never"))),
        ];
        let stream = DeltaStream::new(byte_stream_from_chunks(chunks));
        assert_eq!(collect_text(stream).await.unwrap(), "Hello, world");
    }

    #[tokio::test]
    async fn delta_stream_ends_quietly_without_sentinel() {
        let chunks = vec![Ok(Bytes::from(frame("partial")))];
        let deltas: Vec<_> = DeltaStream::new(byte_stream_from_chunks(chunks))
            .collect()
            .await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap(), "partial");
    }

    #[tokio::test]
    async fn transport_error_is_yielded_once_and_ends_stream() {
        let chunks = vec![
            Ok(Bytes::from(frame("before"))),
            Err(UpstreamError::Stream("connection reset".to_string())),
            Ok(Bytes::from(frame("after"))),
        ];
        let mut stream = DeltaStream::new(byte_stream_from_chunks(chunks));
        assert_eq!(stream.next().await.unwrap().unwrap(), "before");
        assert!(matches!(stream.next().await, Some(Err(UpstreamError::Stream(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn collecting_surfaces_transport_error() {
        let chunks = vec![
            Ok(Bytes::from(frame("before"))),
            Err(UpstreamError::Stream("boom".to_string())),
        ];
        let result = collect_text(DeltaStream::new(byte_stream_from_chunks(chunks))).await;
        assert!(result.is_err());
    }
}
