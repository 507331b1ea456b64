//! Stream transport: framed requests and replies over an async byte stream.
//!
//! `TcpChannel` binds a listener when the channel is acquired and serves a
//! single client, accepted on the first receive.

use super::{ChannelError, ChannelSpec, RecvError, RpcChannel, SendError, DEFAULT_MAX_MSG};
use crate::codec::{self, Command, ParseResult};
use bytes::{Buf, BytesMut};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, trace};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Server side of a framed stream.
pub struct StreamChannel<S> {
    name: String,
    max_msg: usize,
    stream: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(name: impl Into<String>, max_msg: usize, stream: S) -> Self {
        Self {
            name: name.into(),
            max_msg,
            stream,
            read_buf: BytesMut::with_capacity(BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    /// Read more bytes into the buffer. A closed stream is `Closed`.
    async fn fill(&mut self) -> Result<(), RecvError> {
        let n = self.stream.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            trace!(channel = %self.name, "Stream closed by peer");
            return Err(RecvError::Closed);
        }
        Ok(())
    }
}

impl<S> RpcChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn recv(&mut self, buf: &mut String) -> Result<usize, RecvError> {
        buf.clear();

        loop {
            match codec::parse(&self.read_buf, self.max_msg) {
                ParseResult::Complete(Command::Quit) => {
                    self.read_buf.clear();
                    return Err(RecvError::Eof);
                }
                ParseResult::Complete(Command::Message { length, header_len }) => {
                    let total = header_len.checked_add(length).ok_or(RecvError::TooLarge {
                        len: length,
                        max: self.max_msg,
                    })?;
                    while self.read_buf.len() < total {
                        self.fill().await?;
                    }

                    let payload = &self.read_buf[header_len..total];
                    if codec::is_eof(payload) {
                        self.read_buf.advance(total);
                        return Err(RecvError::Eof);
                    }

                    let text = std::str::from_utf8(payload).map_err(|_| RecvError::InvalidUtf8)?;
                    buf.push_str(text);
                    self.read_buf.advance(total);
                    return Ok(length);
                }
                ParseResult::Incomplete => self.fill().await?,
                ParseResult::InvalidLength => {
                    return Err(RecvError::Malformed("invalid length header".into()))
                }
                ParseResult::TooLarge { length } => {
                    return Err(RecvError::TooLarge {
                        len: length,
                        max: self.max_msg,
                    })
                }
            }
        }
    }

    async fn send(&mut self, reply: &str) -> Result<(), SendError> {
        if reply.len() > self.max_msg {
            return Err(SendError::TooLarge {
                len: reply.len(),
                max: self.max_msg,
            });
        }

        self.write_buf.clear();
        codec::encode(reply.as_bytes(), &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A channel bound to a TCP address, serving one client.
pub struct TcpChannel {
    name: String,
    max_msg: usize,
    listener: TcpListener,
    conn: Option<StreamChannel<TcpStream>>,
}

impl TcpChannel {
    /// Acquire the channel: validate the binding and bind the listener.
    pub async fn bind(spec: &ChannelSpec, listen: &str) -> Result<Self, ChannelError> {
        spec.validate()?;

        let listener = TcpListener::bind(listen)
            .await
            .map_err(|source| ChannelError::Bind {
                addr: listen.to_string(),
                source,
            })?;

        debug!(channel = %spec.name, address = %listen, "Channel bound");

        Ok(Self {
            name: spec.name.clone(),
            max_msg: spec.max_msg,
            listener,
            conn: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl RpcChannel for TcpChannel {
    async fn recv(&mut self, buf: &mut String) -> Result<usize, RecvError> {
        if self.conn.is_none() {
            let (stream, peer) = self.listener.accept().await?;
            debug!(channel = %self.name, peer = %peer, "Client connected");
            self.conn = Some(StreamChannel::new(self.name.clone(), self.max_msg, stream));
        }

        match self.conn.as_mut() {
            Some(conn) => conn.recv(buf).await,
            None => Err(RecvError::Closed),
        }
    }

    async fn send(&mut self, reply: &str) -> Result<(), SendError> {
        match self.conn.as_mut() {
            Some(conn) => conn.send(reply).await,
            None => Err(SendError::Closed),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Client side of a framed stream.
pub struct StreamClient<S> {
    max_msg: usize,
    stream: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

/// A client connected over TCP.
pub type TcpClient = StreamClient<TcpStream>;

impl StreamClient<TcpStream> {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }
}

impl<S> StreamClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            max_msg: DEFAULT_MAX_MSG,
            stream,
            read_buf: BytesMut::with_capacity(BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    /// Largest reply the client accepts.
    pub fn with_max_msg(mut self, max_msg: usize) -> Self {
        self.max_msg = max_msg;
        self
    }

    /// Send a request and wait for its reply.
    pub async fn call(&mut self, request: &str) -> io::Result<String> {
        self.write_frame(request.as_bytes()).await?;

        loop {
            match codec::parse(&self.read_buf, self.max_msg) {
                ParseResult::Complete(Command::Message { length, header_len }) => {
                    let total = header_len.checked_add(length).ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "reply length overflows")
                    })?;
                    while self.read_buf.len() < total {
                        self.fill().await?;
                    }
                    let reply = String::from_utf8(self.read_buf[header_len..total].to_vec())
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    self.read_buf.advance(total);
                    return Ok(reply);
                }
                ParseResult::Incomplete => self.fill().await?,
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("bad reply header: {other:?}"),
                    ))
                }
            }
        }
    }

    /// Signal end-of-stream to the server.
    pub async fn close(mut self) -> io::Result<()> {
        self.write_frame(codec::EOF_SENTINEL).await?;
        self.stream.shutdown().await
    }

    async fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        self.write_buf.clear();
        codec::encode(payload, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await
    }

    async fn fill(&mut self) -> io::Result<()> {
        let n = self.stream.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the channel",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_recv_and_reply() {
        let mock = Builder::new()
            .read(b"5\r\nhello")
            .write(b"5\r\nhello")
            .build();
        let mut channel = StreamChannel::new("test", 64, mock);
        let mut buf = String::new();

        assert_eq!(channel.recv(&mut buf).await.unwrap(), 5);
        assert_eq!(buf, "hello");
        channel.send(&buf).await.unwrap();

        assert!(matches!(channel.recv(&mut buf).await, Err(RecvError::Closed)));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_recv_split_frames() {
        let mock = Builder::new()
            .read(b"1")
            .read(b"1\r\nhello")
            .read(b" world0\r\n")
            .build();
        let mut channel = StreamChannel::new("test", 64, mock);
        let mut buf = String::new();

        assert_eq!(channel.recv(&mut buf).await.unwrap(), 11);
        assert_eq!(buf, "hello world");
        assert_eq!(channel.recv(&mut buf).await.unwrap(), 0);
        assert_eq!(buf, "");
    }

    #[tokio::test]
    async fn test_eof_sentinel_and_quit() {
        let mock = Builder::new().read(b"6\r\nEOF!!!").build();
        let mut channel = StreamChannel::new("test", 64, mock);
        let mut buf = String::new();
        assert!(matches!(channel.recv(&mut buf).await, Err(RecvError::Eof)));

        let mock = Builder::new().read(b"QUIT\r\n").build();
        let mut channel = StreamChannel::new("test", 64, mock);
        assert!(matches!(channel.recv(&mut buf).await, Err(RecvError::Eof)));
    }

    #[tokio::test]
    async fn test_recv_rejects_oversize() {
        let mock = Builder::new().read(b"9\r\n").build();
        let mut channel = StreamChannel::new("test", 8, mock);
        let mut buf = String::new();
        match channel.recv(&mut buf).await {
            Err(RecvError::TooLarge { len: 9, max: 8 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recv_rejects_length_near_usize_max() {
        let header = format!("{}\r\n", usize::MAX);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut channel = StreamChannel::new("test", usize::MAX, mock);
        let mut buf = String::new();
        match channel.recv(&mut buf).await {
            Err(RecvError::TooLarge { len, .. }) => assert_eq!(len, usize::MAX),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_rejects_reply_length_near_usize_max() {
        let header = format!("{}\r\n", usize::MAX);
        let mock = Builder::new()
            .write(b"1\r\na")
            .read(header.as_bytes())
            .build();
        let mut client = StreamClient::new(mock).with_max_msg(usize::MAX);
        let err = client.call("a").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_recv_rejects_invalid_utf8() {
        let mock = Builder::new().read(b"2\r\n\xff\xfe").build();
        let mut channel = StreamChannel::new("test", 8, mock);
        let mut buf = String::new();
        assert!(matches!(
            channel.recv(&mut buf).await,
            Err(RecvError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_closed() {
        let mock = Builder::new().read(b"5\r\nhel").build();
        let mut channel = StreamChannel::new("test", 8, mock);
        let mut buf = String::new();
        assert!(matches!(channel.recv(&mut buf).await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_send_rejects_oversize() {
        let mock = Builder::new().build();
        let mut channel = StreamChannel::new("test", 4, mock);
        assert!(matches!(
            channel.send("hello").await,
            Err(SendError::TooLarge { len: 5, max: 4 })
        ));
    }

    #[tokio::test]
    async fn test_client_call_and_close() {
        let mock = Builder::new()
            .write(b"3\r\nabc")
            .read(b"3\r\nabc")
            .write(b"6\r\nEOF!!!")
            .build();
        let mut client = StreamClient::new(mock);
        assert_eq!(client.call("abc").await.unwrap(), "abc");
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_spec() {
        let mut spec = ChannelSpec::default();
        spec.request_format = "%f".into();
        assert!(matches!(
            TcpChannel::bind(&spec, "127.0.0.1:0").await,
            Err(ChannelError::Format(_))
        ));
    }
}
