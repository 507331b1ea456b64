//! maxmsg: an echo service bound to a named request/reply channel.
//!
//! The service receives string requests up to a configured size, logs each
//! one and sends it back unchanged. It runs until the channel signals
//! end-of-stream or fails.
//!
//! - `service`: the echo loop, generic over [`channel::RpcChannel`]
//! - `channel`: the channel trait and its TCP and in-process transports
//! - `codec`: length-prefixed wire framing for stream transports
//! - `format`: `%s` format templates declared by a channel
//! - `config`: CLI and TOML configuration

pub mod channel;
pub mod codec;
pub mod config;
pub mod format;
pub mod service;

pub use channel::{ChannelSpec, RpcChannel};
pub use service::{EchoService, ServiceReport};
