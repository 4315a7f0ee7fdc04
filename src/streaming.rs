//! The unified streaming-iterator abstraction and SSE framing (C4).

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use thiserror::Error;

use crate::openai::ChatCompletionChunk;

/// Headers that must never be copied verbatim from an incoming request
/// onto the outbound backend request (or vice versa for the response).
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "upgrade",
];

pub fn is_hop_by_hop(header_name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(header_name))
}

/// One item pulled from a streaming response: a parsed OpenAI chunk, a
/// raw byte block, or a text slice — the three kinds C4 specifies.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    OpenAi(ChatCompletionChunk),
    Raw(Bytes),
    Text(String),
}

#[derive(Error, Debug)]
pub enum StreamingError {
    #[error("upstream stream error: {0}")]
    Upstream(String),
    #[error("malformed chunk: {0}")]
    Malformed(String),
}

/// A lazy, finite, single-consumer, exhausted-once sequence of chunks.
#[async_trait]
pub trait StreamingIterator: Send {
    async fn next(&mut self) -> Result<Option<StreamChunk>, StreamingError>;

    /// Release any held upstream resources synchronously; called on
    /// client-side cancellation so the upstream pull stops promptly.
    fn close(&mut self) {}
}

/// Wraps an upstream byte source already yielding one JSON document per
/// SDK chunk, parsing each into a `StreamChunk::OpenAi`. A chunk whose
/// bytes fail to parse as JSON is surfaced as `StreamChunk::Text` rather
/// than dropped; an upstream transport error is propagated, not hidden.
pub struct OpenAiStream<S> {
    inner: S,
    exhausted: bool,
}

impl<S> OpenAiStream<S>
where
    S: Iterator<Item = Result<Bytes, StreamingError>> + Send,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            exhausted: false,
        }
    }
}

#[async_trait]
impl<S> StreamingIterator for OpenAiStream<S>
where
    S: Iterator<Item = Result<Bytes, StreamingError>> + Send,
{
    async fn next(&mut self) -> Result<Option<StreamChunk>, StreamingError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.inner.next() {
            None => {
                self.exhausted = true;
                Ok(None)
            }
            Some(Err(e)) => {
                self.exhausted = true;
                Err(e)
            }
            Some(Ok(bytes)) => match serde_json::from_slice::<ChatCompletionChunk>(&bytes) {
                Ok(chunk) => Ok(Some(StreamChunk::OpenAi(chunk))),
                Err(_) => Ok(Some(StreamChunk::Text(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ))),
            },
        }
    }

    fn close(&mut self) {
        self.exhausted = true;
    }
}

/// Wraps a raw byte source, reading fixed-size chunks until exhaustion.
pub struct RawByteStream<S> {
    inner: S,
    chunk_size: usize,
    exhausted: bool,
}

impl<S> RawByteStream<S>
where
    S: Iterator<Item = Result<Bytes, StreamingError>> + Send,
{
    pub fn new(inner: S) -> Self {
        Self::with_chunk_size(inner, 8192)
    }

    pub fn with_chunk_size(inner: S, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk_size,
            exhausted: false,
        }
    }
}

#[async_trait]
impl<S> StreamingIterator for RawByteStream<S>
where
    S: Iterator<Item = Result<Bytes, StreamingError>> + Send,
{
    async fn next(&mut self) -> Result<Option<StreamChunk>, StreamingError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.inner.next() {
            None => {
                self.exhausted = true;
                Ok(None)
            }
            Some(Err(e)) => {
                self.exhausted = true;
                Err(e)
            }
            Some(Ok(bytes)) => {
                if bytes.len() <= self.chunk_size {
                    Ok(Some(StreamChunk::Raw(bytes)))
                } else {
                    Ok(Some(StreamChunk::Raw(bytes.slice(0..self.chunk_size))))
                }
            }
        }
    }

    fn close(&mut self) {
        self.exhausted = true;
    }
}

/// Decodes the SSE wire format produced by an upstream
/// `text/event-stream` chat-completions response into `StreamChunk`s,
/// grounded in the teacher's `ResponsesSseToChatSse` buffer-and-split
/// frame extraction (`server.rs`), adapted to this crate's
/// `StreamingIterator` contract instead of a raw `futures::Stream` impl.
/// Constructed by `SendBackendRequest` directly over the upstream
/// response's byte stream, so `process_chunk` transforms can be applied
/// by the orchestrator without re-issuing the upstream call.
pub struct UpstreamSseDecoder<S> {
    inner: S,
    buffer: BytesMut,
    done: bool,
}

impl<S> UpstreamSseDecoder<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin + Send,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            done: false,
        }
    }

    fn next_frame(&mut self) -> Option<Bytes> {
        let pos = self
            .buffer
            .windows(2)
            .position(|window| window == b"\n\n")?;
        let frame = self.buffer.split_to(pos + 2).freeze();
        Some(frame)
    }

    fn frame_to_chunk(frame: &Bytes) -> Option<StreamChunk> {
        let mut data_lines = Vec::new();
        for line in frame.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if let Some(payload) = line.strip_prefix(b"data:") {
                let payload = std::str::from_utf8(payload).unwrap_or("").trim();
                if !payload.is_empty() {
                    data_lines.push(payload.to_string());
                }
            }
        }
        if data_lines.is_empty() {
            return None;
        }
        let data = data_lines.join("\n");
        if data == "[DONE]" {
            return None;
        }
        match serde_json::from_str::<ChatCompletionChunk>(&data) {
            Ok(chunk) => Some(StreamChunk::OpenAi(chunk)),
            Err(_) => Some(StreamChunk::Text(data)),
        }
    }
}

#[async_trait]
impl<S> StreamingIterator for UpstreamSseDecoder<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin + Send,
{
    async fn next(&mut self) -> Result<Option<StreamChunk>, StreamingError> {
        loop {
            if let Some(frame) = self.next_frame() {
                if let Some(chunk) = Self::frame_to_chunk(&frame) {
                    return Ok(Some(chunk));
                }
                if self.done && self.buffer.is_empty() {
                    return Ok(None);
                }
                continue;
            }
            if self.done {
                return Ok(None);
            }
            match self.inner.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(StreamingError::Upstream(e.to_string())),
                None => self.done = true,
            }
        }
    }

    fn close(&mut self) {
        self.done = true;
    }
}

/// Wraps an upstream byte stream that should pass through unparsed and
/// unframed — the raw-passthrough streaming case (§4.7), where the
/// client's `Accept: text/event-stream` is honored by forwarding
/// whatever bytes the backend sends without decoding them as chat
/// completion chunks.
pub struct UpstreamRawStream<S> {
    inner: S,
    done: bool,
}

impl<S> UpstreamRawStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin + Send,
{
    pub fn new(inner: S) -> Self {
        Self { inner, done: false }
    }
}

#[async_trait]
impl<S> StreamingIterator for UpstreamRawStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin + Send,
{
    async fn next(&mut self) -> Result<Option<StreamChunk>, StreamingError> {
        if self.done {
            return Ok(None);
        }
        match self.inner.next().await {
            Some(Ok(bytes)) => Ok(Some(StreamChunk::Raw(bytes))),
            Some(Err(e)) => {
                self.done = true;
                Err(StreamingError::Upstream(e.to_string()))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.done = true;
    }
}

/// Splits pre-existing text into fixed-size pieces, for synthesizing a
/// streaming response out of a buffered one.
pub struct ChunkedTextStream {
    text: String,
    chunk_size: usize,
    position: usize,
}

impl ChunkedTextStream {
    pub fn new(text: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            text: text.into(),
            chunk_size: chunk_size.max(1),
            position: 0,
        }
    }
}

#[async_trait]
impl StreamingIterator for ChunkedTextStream {
    async fn next(&mut self) -> Result<Option<StreamChunk>, StreamingError> {
        if self.position >= self.text.len() {
            return Ok(None);
        }
        let end = (self.position + self.chunk_size).min(self.text.len());
        let slice = self.text[self.position..end].to_string();
        self.position = end;
        Ok(Some(StreamChunk::Text(slice)))
    }
}

/// Wraps any `StreamingIterator` with `peek`, buffering chunks so a
/// policy can inspect the start of a stream before deciding whether to
/// pass it through untouched.
pub struct StreamingBuffer<S> {
    inner: S,
    buffer: VecDeque<StreamChunk>,
    exhausted: bool,
    replay_position: usize,
}

impl<S> StreamingBuffer<S>
where
    S: StreamingIterator,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: VecDeque::new(),
            exhausted: false,
            replay_position: 0,
        }
    }

    /// Peek at up to `n` chunks without consuming the logical position;
    /// shorter than `n` if the stream ends first.
    pub async fn peek(&mut self, n: usize) -> Result<Vec<StreamChunk>, StreamingError> {
        while self.buffer.len() < n && !self.exhausted {
            match self.inner.next().await? {
                Some(chunk) => self.buffer.push_back(chunk),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        Ok(self.buffer.iter().take(n).cloned().collect())
    }
}

#[async_trait]
impl<S> StreamingIterator for StreamingBuffer<S>
where
    S: StreamingIterator,
{
    async fn next(&mut self) -> Result<Option<StreamChunk>, StreamingError> {
        if let Some(chunk) = self.buffer.get(self.replay_position) {
            let chunk = chunk.clone();
            self.replay_position += 1;
            return Ok(Some(chunk));
        }
        if self.exhausted {
            return Ok(None);
        }
        match self.inner.next().await? {
            Some(chunk) => {
                self.buffer.push_back(chunk.clone());
                self.replay_position += 1;
                Ok(Some(chunk))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.inner.close();
        self.exhausted = true;
    }
}

/// Format one data payload as an SSE event, matching the wire shape
/// `event: <name>\ndata: <json>\n\n` (event line omitted when absent).
pub fn format_sse_chunk(data: &serde_json::Value, event: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(event) = event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    out.push_str("data: ");
    out.push_str(&serde_json::to_string(data).unwrap_or_default());
    out.push_str("\n\n");
    out
}

pub fn format_openai_streaming_chunk(chunk: &ChatCompletionChunk) -> String {
    let value = serde_json::to_value(chunk).unwrap_or(serde_json::Value::Null);
    format_sse_chunk(&value, None)
}

pub fn format_streaming_error(message: &str, transaction_id: Option<&str>) -> String {
    let mut data = serde_json::json!({ "error": message });
    if let Some(id) = transaction_id {
        data["transaction_id"] = serde_json::Value::String(id.to_string());
    }
    format_sse_chunk(&data, Some("error"))
}

pub const DONE_EVENT: &str = "data: [DONE]\n\n";

/// Adapts any `StreamingIterator` into a `futures::Stream` of SSE-framed
/// bytes, for handing to an HTTP body. Each chunk is framed
/// independently (no cross-chunk buffering is required since chunks are
/// already complete logical units).
pub struct SseBody<S> {
    inner: S,
    done: bool,
}

impl<S> SseBody<S>
where
    S: StreamingIterator + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self { inner, done: false }
    }
}

impl<S> Stream for SseBody<S>
where
    S: StreamingIterator + Unpin,
{
    type Item = Result<Bytes, StreamingError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let fut = this.inner.next();
        futures_util::pin_mut!(fut);
        match fut.poll(cx) {
            Poll::Ready(Ok(Some(StreamChunk::OpenAi(chunk)))) => {
                Poll::Ready(Some(Ok(Bytes::from(format_openai_streaming_chunk(&chunk)))))
            }
            Poll::Ready(Ok(Some(StreamChunk::Raw(bytes)))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Ok(Some(StreamChunk::Text(text)))) => {
                let value = serde_json::json!({ "text": text });
                Poll::Ready(Some(Ok(Bytes::from(format_sse_chunk(&value, None)))))
            }
            Poll::Ready(Ok(None)) => {
                this.done = true;
                Poll::Ready(Some(Ok(Bytes::from(DONE_EVENT))))
            }
            Poll::Ready(Err(e)) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
