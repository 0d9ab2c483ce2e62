//! Client-side reader for the relay's byte stream.
//!
//! The relay sends raw UTF-8 text, chunked wherever the provider and the
//! network happened to split it. [`StreamReader`] reassembles it, publishing
//! the accumulated text after every chunk, and rides out transient read
//! failures for a bounded time before giving up.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::ChatError;

/// Pause between attempts when a read fails.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// Total time reads may keep failing before the stream is abandoned.
pub const DEFAULT_RETRY_CEILING: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RETRY_BACKOFF,
            ceiling: DEFAULT_RETRY_CEILING,
        }
    }
}

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across chunks is held back until its
/// remaining bytes arrive. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush at end of stream; a dangling partial character becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Reading,
    Backoff,
    Failed,
    Done,
}

/// Per-exchange reading state; dropped with the reader.
#[derive(Debug)]
pub struct StreamSession {
    text: String,
    decoder: Utf8Decoder,
    state: ReaderState,
    consecutive_failures: u32,
    retry_started: Option<Instant>,
    last_error: Option<String>,
    cancel_token: CancellationToken,
}

impl StreamSession {
    fn new(cancel_token: CancellationToken) -> Self {
        Self {
            text: String::new(),
            decoder: Utf8Decoder::new(),
            state: ReaderState::Reading,
            consecutive_failures: 0,
            retry_started: None,
            last_error: None,
            cancel_token,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Time since the first failure of the current failure streak.
    pub fn retry_elapsed(&self) -> Duration {
        self.retry_started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.retry_started = None;
        self.last_error = None;
    }
}

/// Single-consumer reader over the relay's response body.
///
/// Not restartable: once it reaches `Done` or `Failed` further calls return
/// the terminal outcome without touching the stream again.
pub struct StreamReader<S> {
    stream: S,
    policy: RetryPolicy,
    session: StreamSession,
}

impl<S, E> StreamReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    pub fn new(stream: S, policy: RetryPolicy) -> Self {
        Self::with_cancel_token(stream, policy, CancellationToken::new())
    }

    pub fn with_cancel_token(stream: S, policy: RetryPolicy, token: CancellationToken) -> Self {
        Self {
            stream,
            policy,
            session: StreamSession::new(token),
        }
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Advance until the accumulated text grows, the stream ends, or reading
    /// fails for good. Returns the full accumulated text on growth and
    /// `None` once the stream has completed.
    pub async fn next_update(&mut self) -> Result<Option<&str>, ChatError> {
        loop {
            match self.session.state {
                ReaderState::Done => return Ok(None),
                ReaderState::Failed => return Err(self.terminal_error()),
                ReaderState::Backoff => {
                    let wait = self.next_wait();
                    let token = self.session.cancel_token.clone();
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                    self.session.state = ReaderState::Reading;
                }
                ReaderState::Reading => {
                    if self.session.cancel_token.is_cancelled() {
                        return Err(self.cancel());
                    }

                    let token = self.session.cancel_token.clone();
                    let next = tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        item = self.stream.next() => Some(item),
                    };
                    let Some(item) = next else {
                        return Err(self.cancel());
                    };

                    match item {
                        Some(Ok(chunk)) => {
                            self.session.record_success();
                            let fragment = self.session.decoder.decode(&chunk);
                            if !fragment.is_empty() {
                                self.session.text.push_str(&fragment);
                                return Ok(Some(&self.session.text));
                            }
                        }
                        Some(Err(err)) => self.on_read_failure(err.to_string())?,
                        None => return self.on_stream_end(),
                    }
                }
            }
        }
    }

    /// The configured backoff, cut short so the last attempt lands exactly
    /// on the ceiling.
    fn next_wait(&self) -> Duration {
        let remaining = self
            .policy
            .ceiling
            .saturating_sub(self.session.retry_elapsed());
        self.policy.backoff.min(remaining)
    }

    fn cancel(&mut self) -> ChatError {
        self.session.state = ReaderState::Failed;
        self.session.last_error = Some("cancelled".to_string());
        ChatError::Cancelled
    }

    fn on_read_failure(&mut self, error: String) -> Result<(), ChatError> {
        let started = *self.session.retry_started.get_or_insert_with(Instant::now);
        let elapsed = started.elapsed();
        self.session.last_error = Some(error.clone());

        if elapsed >= self.policy.ceiling {
            warn!(
                attempts = self.session.consecutive_failures,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %error,
                "giving up on stream after repeated read failures"
            );
            self.session.state = ReaderState::Failed;
            return Err(self.terminal_error());
        }

        self.session.consecutive_failures += 1;
        debug!(
            attempt = self.session.consecutive_failures,
            error = %error,
            "stream read failed; backing off"
        );
        self.session.state = ReaderState::Backoff;
        Ok(())
    }

    fn on_stream_end(&mut self) -> Result<Option<&str>, ChatError> {
        if self.session.retry_started.is_some() {
            // The transport closed while we were recovering from an error:
            // whatever was in flight is lost, so the text is incomplete.
            self.session.state = ReaderState::Failed;
            return Err(self.terminal_error());
        }

        self.session.state = ReaderState::Done;
        let tail = self.session.decoder.finish();
        if tail.is_empty() {
            Ok(None)
        } else {
            self.session.text.push_str(&tail);
            Ok(Some(&self.session.text))
        }
    }

    fn terminal_error(&self) -> ChatError {
        let last_error = self
            .session
            .last_error
            .clone()
            .unwrap_or_else(|| "stream failed".to_string());
        if self.session.cancel_token.is_cancelled() {
            return ChatError::Cancelled;
        }
        let elapsed = self.session.retry_elapsed();
        if elapsed >= self.policy.ceiling {
            ChatError::RetryExhausted {
                attempts: self.session.consecutive_failures,
                elapsed,
                last_error,
            }
        } else {
            ChatError::StreamRead(last_error)
        }
    }

    /// Drive the stream to completion, calling `on_update` with the
    /// accumulated text after each chunk. Returns the final text.
    pub async fn consume<F>(mut self, mut on_update: F) -> Result<String, ChatError>
    where
        F: FnMut(&str),
    {
        while let Some(text) = self.next_update().await? {
            on_update(text);
        }
        Ok(self.session.text)
    }
}
