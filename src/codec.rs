//! Wire framing for stream channels.
//!
//! Requests and replies use the same length-prefixed framing:
//!
//! ```text
//! Request:  <length>\r\n<data of exactly length bytes>
//! Response: <length>\r\n<data of exactly length bytes>
//!
//! Example:
//! Request:  5\r\nhello
//! Response: 5\r\nhello
//! ```
//!
//! A client ends its request stream either with the line `QUIT\r\n` or by
//! sending a message whose payload is the [`EOF_SENTINEL`].

use bytes::{BufMut, BytesMut};

/// Payload that marks the end of a request stream.
pub const EOF_SENTINEL: &[u8] = b"EOF!!!";

/// Longest accepted header line, excluding `\r\n`.
const MAX_HEADER_LEN: usize = 20;

/// Parsed frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A message follows the header.
    Message {
        /// Length of the payload.
        length: usize,
        /// Bytes consumed by the header (length + \r\n).
        header_len: usize,
    },
    /// Quit command.
    Quit,
}

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// Successfully parsed header.
    Complete(Command),
    /// Need more data for header.
    Incomplete,
    /// Invalid length format.
    InvalidLength,
    /// Declared length exceeds the channel maximum.
    TooLarge { length: usize },
}

/// Parse a frame header from the input buffer.
///
/// For `Message` headers the caller must wait until `header_len + length`
/// bytes are buffered before taking the payload.
pub fn parse(input: &[u8], max_msg: usize) -> ParseResult {
    let line_end = match find_crlf(input) {
        Some(pos) => pos,
        None if input.len() > MAX_HEADER_LEN + 1 => return ParseResult::InvalidLength,
        None => return ParseResult::Incomplete,
    };

    let line = &input[..line_end];

    if line.eq_ignore_ascii_case(b"QUIT") {
        return ParseResult::Complete(Command::Quit);
    }

    if line.is_empty() || line.len() > MAX_HEADER_LEN || !line.iter().all(u8::is_ascii_digit) {
        return ParseResult::InvalidLength;
    }

    // digits only, so this is valid UTF-8
    let length: usize = match std::str::from_utf8(line).ok().and_then(|s| s.parse().ok()) {
        Some(len) => len,
        None => return ParseResult::InvalidLength,
    };

    if length > max_msg {
        return ParseResult::TooLarge { length };
    }

    ParseResult::Complete(Command::Message {
        length,
        header_len: line_end + 2,
    })
}

/// Whether a payload is the end-of-stream sentinel.
pub fn is_eof(payload: &[u8]) -> bool {
    payload == EOF_SENTINEL
}

/// Append a framed message to `output`.
pub fn encode(payload: &[u8], output: &mut BytesMut) {
    let length = payload.len();
    let header = format!("{length}\r\n");
    output.reserve(header.len() + payload.len());
    output.put_slice(header.as_bytes());
    output.put_slice(payload);
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    (0..buffer.len().saturating_sub(1)).find(|&i| buffer[i] == b'\r' && buffer[i + 1] == b'\n')
}
