//! Request/reply channels.
//!
//! A channel is a named endpoint that hands out one request at a time and
//! accepts the reply for it. The echo service only sees the [`RpcChannel`]
//! trait; transports live in submodules:
//!
//! - `stream`: length-prefixed frames over an async byte stream (TCP)
//! - `memory`: in-process channels registered in a [`Namespace`]

pub mod memory;
pub mod stream;

pub use memory::{MemoryChannel, MemoryClient, Namespace};
pub use stream::{StreamChannel, StreamClient, TcpChannel, TcpClient};

use crate::format::{FormatError, MsgFormat};
use std::fmt;
use std::io;

/// Default channel name.
pub const DEFAULT_NAME: &str = "maxMsgSrv";

/// Default request and reply format.
pub const DEFAULT_FORMAT: &str = "%s";

/// Default maximum message size in bytes.
pub const DEFAULT_MAX_MSG: usize = 1024 * 1024;

/// Largest accepted `max_msg` (1 GiB).
pub const MAX_MSG_LIMIT: usize = 1024 * 1024 * 1024;

/// A request/reply endpoint.
///
/// Implementations process one request at a time: every successful `recv`
/// is followed by at most one `send` carrying its reply.
#[allow(async_fn_in_trait)]
pub trait RpcChannel {
    /// Wait for the next request and decode it into `buf`.
    ///
    /// `buf` is cleared first. Returns the request length in bytes. Any
    /// error means the channel will not produce further requests.
    async fn recv(&mut self, buf: &mut String) -> Result<usize, RecvError>;

    /// Send the reply to the last received request.
    async fn send(&mut self, reply: &str) -> Result<(), SendError>;

    /// Registered channel name.
    fn name(&self) -> &str;
}

/// Immutable channel binding: name, declared formats and size bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub request_format: String,
    pub reply_format: String,
    pub max_msg: usize,
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            request_format: DEFAULT_FORMAT.to_string(),
            reply_format: DEFAULT_FORMAT.to_string(),
            max_msg: DEFAULT_MAX_MSG,
        }
    }
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_msg(mut self, max_msg: usize) -> Self {
        self.max_msg = max_msg;
        self
    }

    /// Check the binding before a transport acquires it.
    ///
    /// Both formats must declare exactly one string field, and `max_msg`
    /// must lie in `1..=MAX_MSG_LIMIT`.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.name.is_empty() {
            return Err(ChannelError::InvalidSpec("channel name is empty".into()));
        }
        if self.max_msg == 0 {
            return Err(ChannelError::InvalidSpec("max_msg must be positive".into()));
        }
        if self.max_msg > MAX_MSG_LIMIT {
            let max_msg = self.max_msg;
            return Err(ChannelError::InvalidSpec(format!(
                "max_msg {max_msg} exceeds limit of {MAX_MSG_LIMIT}"
            )));
        }

        let request = MsgFormat::parse(&self.request_format)?;
        let reply = MsgFormat::parse(&self.reply_format)?;

        for (role, format) in [("request", &request), ("reply", &reply)] {
            let fields = format.field_count();
            if fields != 1 {
                return Err(ChannelError::InvalidSpec(format!(
                    "{role} format '{format}' declares {fields} fields, expected 1"
                )));
            }
        }

        Ok(())
    }
}

/// Channel acquisition errors.
#[derive(Debug)]
pub enum ChannelError {
    InvalidSpec(String),
    Format(FormatError),
    NameInUse(String),
    NotFound(String),
    Bind { addr: String, source: io::Error },
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::InvalidSpec(msg) => write!(f, "Invalid channel spec: {msg}"),
            ChannelError::Format(e) => write!(f, "Invalid channel format: {e}"),
            ChannelError::NameInUse(name) => write!(f, "Channel '{name}' is already bound"),
            ChannelError::NotFound(name) => write!(f, "No channel named '{name}'"),
            ChannelError::Bind { addr, source } => {
                write!(f, "Failed to bind channel on '{addr}': {source}")
            }
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Format(e) => Some(e),
            ChannelError::Bind { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<FormatError> for ChannelError {
    fn from(e: FormatError) -> Self {
        ChannelError::Format(e)
    }
}

/// Receive errors. Every variant ends the request stream.
#[derive(Debug)]
pub enum RecvError {
    /// The peer went away without signalling end-of-stream.
    Closed,
    /// The peer signalled end-of-stream.
    Eof,
    /// The request exceeds the channel's maximum message size.
    TooLarge { len: usize, max: usize },
    /// The request is not a valid string.
    InvalidUtf8,
    /// The request could not be framed.
    Malformed(String),
    Io(io::Error),
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvError::Closed => write!(f, "channel closed"),
            RecvError::Eof => write!(f, "end of stream"),
            RecvError::TooLarge { len, max } => {
                write!(f, "message of {len} bytes exceeds limit of {max}")
            }
            RecvError::InvalidUtf8 => write!(f, "message is not valid UTF-8"),
            RecvError::Malformed(msg) => write!(f, "malformed message: {msg}"),
            RecvError::Io(e) => write!(f, "receive failed: {e}"),
        }
    }
}

impl std::error::Error for RecvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecvError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RecvError {
    fn from(e: io::Error) -> Self {
        RecvError::Io(e)
    }
}

/// Send errors.
#[derive(Debug)]
pub enum SendError {
    Closed,
    TooLarge { len: usize, max: usize },
    Io(io::Error),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed => write!(f, "channel closed"),
            SendError::TooLarge { len, max } => {
                write!(f, "message of {len} bytes exceeds limit of {max}")
            }
            SendError::Io(e) => write!(f, "send failed: {e}"),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SendError {
    fn from(e: io::Error) -> Self {
        SendError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec() {
        let spec = ChannelSpec::default();
        assert_eq!(spec.name, "maxMsgSrv");
        assert_eq!(spec.request_format, "%s");
        assert_eq!(spec.reply_format, "%s");
        assert_eq!(spec.max_msg, 1048576);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_name_and_zero_size() {
        assert!(matches!(
            ChannelSpec::new("").validate(),
            Err(ChannelError::InvalidSpec(_))
        ));
        assert!(matches!(
            ChannelSpec::default().with_max_msg(0).validate(),
            Err(ChannelError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_limit() {
        assert!(ChannelSpec::default()
            .with_max_msg(MAX_MSG_LIMIT)
            .validate()
            .is_ok());
        assert!(matches!(
            ChannelSpec::default()
                .with_max_msg(MAX_MSG_LIMIT + 1)
                .validate(),
            Err(ChannelError::InvalidSpec(_))
        ));
        assert!(matches!(
            ChannelSpec::default().with_max_msg(usize::MAX).validate(),
            Err(ChannelError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_rejects_bad_formats() {
        let mut spec = ChannelSpec::default();
        spec.request_format = "%d".into();
        assert!(matches!(spec.validate(), Err(ChannelError::Format(_))));

        let mut spec = ChannelSpec::default();
        spec.reply_format = "%s %s".into();
        assert!(matches!(spec.validate(), Err(ChannelError::InvalidSpec(_))));
    }
}
