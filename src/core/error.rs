use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Message shown when the relay rejects the bearer credential.
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized. Please check your API key.";

/// Coarse classification of a failed exchange.
///
/// Callers use this to decide follow-up UX (e.g. prompting for a new
/// credential on `Authorization`) without matching on message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatErrorKind {
    EmptyInput,
    Busy,
    Configuration,
    Authorization,
    MalformedHistory,
    Transport,
    Relay,
    StreamRead,
    RetryExhausted,
    Cancelled,
}

/// Errors raised while driving one exchange with the relay.
#[derive(Debug)]
pub enum ChatError {
    /// Input was empty or whitespace-only; nothing was recorded.
    EmptyInput,
    /// Another exchange is still streaming.
    Busy,
    /// Missing credential, unknown model, or invalid preference value.
    Configuration(String),
    /// The relay rejected the credential.
    Authorization,
    /// Truncation left nothing sendable.
    MalformedHistory { max_input_characters: usize },
    /// The request failed before any response bytes arrived.
    Transport(String),
    /// The relay answered with a non-success status.
    Relay { status: u16, message: String },
    /// A single read failed mid-stream.
    StreamRead(String),
    /// Reads kept failing for longer than the retry ceiling.
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },
    Cancelled,
}

impl ChatError {
    pub fn kind(&self) -> ChatErrorKind {
        match self {
            ChatError::EmptyInput => ChatErrorKind::EmptyInput,
            ChatError::Busy => ChatErrorKind::Busy,
            ChatError::Configuration(_) => ChatErrorKind::Configuration,
            ChatError::Authorization => ChatErrorKind::Authorization,
            ChatError::MalformedHistory { .. } => ChatErrorKind::MalformedHistory,
            ChatError::Transport(_) => ChatErrorKind::Transport,
            ChatError::Relay { .. } => ChatErrorKind::Relay,
            ChatError::StreamRead(_) => ChatErrorKind::StreamRead,
            ChatError::RetryExhausted { .. } => ChatErrorKind::RetryExhausted,
            ChatError::Cancelled => ChatErrorKind::Cancelled,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ChatError::Configuration(message.into())
    }

    pub fn missing_credential() -> Self {
        Self::configuration(
            "API key not found. Run 'relaychat auth' or set RELAYCHAT_API_KEY.",
        )
    }

    pub fn unknown_model(model: &str) -> Self {
        Self::configuration(format!(
            "Unknown model '{model}'. Run 'relaychat models' to list available models."
        ))
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::EmptyInput => write!(f, "Message is empty"),
            ChatError::Busy => write!(
                f,
                "A response is still streaming; wait for it to finish before sending"
            ),
            ChatError::Configuration(message) => write!(f, "{message}"),
            ChatError::Authorization => write!(f, "{UNAUTHORIZED_MESSAGE}"),
            ChatError::MalformedHistory {
                max_input_characters,
            } => write!(
                f,
                "Message does not fit in the input budget of {max_input_characters} characters"
            ),
            ChatError::Transport(message) => write!(f, "Request failed: {message}"),
            ChatError::Relay { message, .. } => write!(f, "{message}"),
            ChatError::StreamRead(message) => write!(f, "Stream read failed: {message}"),
            ChatError::RetryExhausted {
                attempts,
                elapsed,
                last_error,
            } => write!(
                f,
                "Stream read failed after {attempts} retries over {:.1}s: {last_error}",
                elapsed.as_secs_f64()
            ),
            ChatError::Cancelled => write!(f, "Response cancelled"),
        }
    }
}

impl Error for ChatError {}
