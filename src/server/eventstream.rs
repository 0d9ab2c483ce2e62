//! Decoder for the `application/vnd.amazon.eventstream` framing Bedrock uses
//! for streaming responses.
//!
//! A message is laid out as:
//!
//! ```text
//! total_len: u32 | headers_len: u32 | prelude_crc: u32 | headers | payload | message_crc: u32
//! ```
//!
//! All integers are big-endian. `prelude_crc` covers the first eight bytes;
//! `message_crc` covers everything before it.

use bytes::{Buf, Bytes, BytesMut};
use std::error::Error;
use std::fmt;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_MESSAGE_LEN: usize = PRELUDE_LEN + CRC_LEN;
/// Upper bound on a single message; anything larger is treated as corrupt.
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Bytes,
}

impl EventMessage {
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        match self.header(name) {
            Some(HeaderValue::String(value)) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStreamError {
    InvalidLength(usize),
    PreludeChecksum { expected: u32, actual: u32 },
    MessageChecksum { expected: u32, actual: u32 },
    MalformedHeaders(String),
    /// Body ended in the middle of a message.
    Truncated(usize),
}

impl fmt::Display for EventStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStreamError::InvalidLength(len) => {
                write!(f, "invalid event-stream message length {len}")
            }
            EventStreamError::PreludeChecksum { expected, actual } => write!(
                f,
                "event-stream prelude checksum mismatch (expected {expected:#010x}, got {actual:#010x})"
            ),
            EventStreamError::MessageChecksum { expected, actual } => write!(
                f,
                "event-stream message checksum mismatch (expected {expected:#010x}, got {actual:#010x})"
            ),
            EventStreamError::MalformedHeaders(reason) => {
                write!(f, "malformed event-stream headers: {reason}")
            }
            EventStreamError::Truncated(remaining) => {
                write!(f, "event stream ended with {remaining} undecoded bytes")
            }
        }
    }
}

impl Error for EventStreamError {}

/// Incremental decoder: feed body chunks with [`push`](Self::push) and drain
/// complete messages with [`next_message`](Self::next_message).
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn next_message(&mut self) -> Result<Option<EventMessage>, EventStreamError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = read_u32(&self.buffer[0..4]) as usize;
        let headers_len = read_u32(&self.buffer[4..8]) as usize;
        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len)
            || headers_len > total_len - MIN_MESSAGE_LEN
        {
            return Err(EventStreamError::InvalidLength(total_len));
        }

        let expected = read_u32(&self.buffer[8..12]);
        let actual = crc32fast::hash(&self.buffer[..8]);
        if expected != actual {
            return Err(EventStreamError::PreludeChecksum { expected, actual });
        }

        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let mut message = self.buffer.split_to(total_len).freeze();
        let crc_offset = total_len - CRC_LEN;
        let expected = read_u32(&message[crc_offset..]);
        let actual = crc32fast::hash(&message[..crc_offset]);
        if expected != actual {
            return Err(EventStreamError::MessageChecksum { expected, actual });
        }

        message.truncate(crc_offset);
        message.advance(PRELUDE_LEN);
        let header_block = message.split_to(headers_len);
        let headers = parse_headers(header_block)?;

        Ok(Some(EventMessage {
            headers,
            payload: message,
        }))
    }

    /// Call once the body has ended; leftover bytes mean a cut-off message.
    pub fn finish(&self) -> Result<(), EventStreamError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(EventStreamError::Truncated(self.buffer.len()))
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(raw)
}

fn parse_headers(mut block: Bytes) -> Result<Vec<(String, HeaderValue)>, EventStreamError> {
    let mut headers = Vec::new();
    while block.has_remaining() {
        let name_len = block.get_u8() as usize;
        let name = take_string(&mut block, name_len)?;
        ensure(&block, 1, "missing value type")?;
        let value = match block.get_u8() {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                ensure(&block, 1, "short byte value")?;
                HeaderValue::Byte(block.get_i8())
            }
            3 => {
                ensure(&block, 2, "short int16 value")?;
                HeaderValue::Short(block.get_i16())
            }
            4 => {
                ensure(&block, 4, "short int32 value")?;
                HeaderValue::Int(block.get_i32())
            }
            5 => {
                ensure(&block, 8, "short int64 value")?;
                HeaderValue::Long(block.get_i64())
            }
            6 => {
                ensure(&block, 2, "missing bytes length")?;
                let len = block.get_u16() as usize;
                ensure(&block, len, "short bytes value")?;
                HeaderValue::Bytes(block.split_to(len))
            }
            7 => {
                ensure(&block, 2, "missing string length")?;
                let len = block.get_u16() as usize;
                HeaderValue::String(take_string(&mut block, len)?)
            }
            8 => {
                ensure(&block, 8, "short timestamp value")?;
                HeaderValue::Timestamp(block.get_i64())
            }
            9 => {
                ensure(&block, 16, "short uuid value")?;
                let mut uuid = [0u8; 16];
                block.copy_to_slice(&mut uuid);
                HeaderValue::Uuid(uuid)
            }
            other => {
                return Err(EventStreamError::MalformedHeaders(format!(
                    "unknown value type {other} for header '{name}'"
                )))
            }
        };
        headers.push((name, value));
    }
    Ok(headers)
}

fn ensure(block: &Bytes, needed: usize, what: &str) -> Result<(), EventStreamError> {
    if block.remaining() < needed {
        Err(EventStreamError::MalformedHeaders(what.to_string()))
    } else {
        Ok(())
    }
}

fn take_string(block: &mut Bytes, len: usize) -> Result<String, EventStreamError> {
    ensure(block, len, "short string")?;
    let raw = block.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|err| EventStreamError::MalformedHeaders(err.to_string()))
}
