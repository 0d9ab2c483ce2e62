//! Server-sent-event decoding shared by the OpenAI-compatible and Google
//! bindings.

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use memchr::memchr;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use tracing::debug;

use super::providers::{ProviderError, TextStream};

/// What a single `data:` payload means to a binding.
#[derive(Debug, PartialEq, Eq)]
pub enum SsePayload {
    Text(String),
    Skip,
    Done,
}

pub fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Accumulates raw body bytes and hands back complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line, trimmed. Lines that are not valid UTF-8 are
    /// dropped.
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line = std::str::from_utf8(&self.buffer[..newline_pos])
                .map(|s| s.trim().to_string());
            self.buffer.drain(..=newline_pos);
            match line {
                Ok(line) => return Some(line),
                Err(err) => debug!("dropping invalid UTF-8 line in event stream: {err}"),
            }
        }
        None
    }

    /// Whatever is left once the body has ended without a trailing newline.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        String::from_utf8(rest)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Pull a one-line human summary out of an upstream JSON error body.
pub fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// Summarise a failed upstream response body for the relay's error reply.
pub fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .unwrap_or_else(|| trimmed.to_string())
}

struct SseState<S, F> {
    body: Pin<Box<S>>,
    lines: LineBuffer,
    pending: VecDeque<Result<String, ProviderError>>,
    parse: F,
    finished: bool,
}

impl<S, F> SseState<S, F>
where
    F: FnMut(&str) -> Result<SsePayload, ProviderError>,
{
    fn handle_line(&mut self, line: &str) {
        let Some(payload) = extract_data_payload(line) else {
            return;
        };
        if payload.is_empty() {
            return;
        }
        match (self.parse)(payload) {
            Ok(SsePayload::Text(text)) => {
                if !text.is_empty() {
                    self.pending.push_back(Ok(text));
                }
            }
            Ok(SsePayload::Skip) => {}
            Ok(SsePayload::Done) => self.finished = true,
            Err(err) => {
                self.pending.push_back(Err(err));
                self.finished = true;
            }
        }
    }
}

/// Turn an SSE response body into a stream of text fragments using `parse`
/// to interpret each `data:` payload.
///
/// The stream ends on a `Done` payload or when the body ends; the first
/// error (transport or parse) is yielded and ends the stream.
pub fn text_stream<S, E, F>(body: S, parse: F) -> TextStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send,
    F: FnMut(&str) -> Result<SsePayload, ProviderError> + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        lines: LineBuffer::new(),
        pending: VecDeque::new(),
        parse,
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.lines.push(&chunk);
                    while let Some(line) = state.lines.next_line() {
                        state.handle_line(&line);
                        if state.finished {
                            break;
                        }
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(ProviderError::Stream(err.to_string())));
                }
                None => {
                    if let Some(line) = state.lines.take_remainder() {
                        state.handle_line(&line);
                    }
                    state.finished = true;
                }
            }
        }
    }))
}
