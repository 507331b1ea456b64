//! In-process channels.
//!
//! A [`Namespace`] maps channel names to live channels. Names are unique
//! while the channel that registered them is alive.
//!
//! The registry only holds a weak handle to each channel, plus one strong
//! handle reserved for the first client. Once every client is gone the
//! server side sees the channel as closed.

use super::{ChannelError, ChannelSpec, RecvError, RpcChannel, SendError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Requests queued per channel before callers wait.
const QUEUE_DEPTH: usize = 64;

enum Envelope {
    Request {
        payload: String,
        reply: oneshot::Sender<String>,
    },
    Eof,
}

struct Entry {
    weak: mpsc::WeakSender<Envelope>,
    /// Keeps the channel open until the first client connects.
    first: Option<mpsc::Sender<Envelope>>,
}

/// Registry of named in-process channels.
#[derive(Clone, Default)]
pub struct Namespace {
    channels: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a server channel under `spec.name`.
    pub fn serve(&self, spec: &ChannelSpec) -> Result<MemoryChannel, ChannelError> {
        spec.validate()?;

        let mut channels = self.lock();
        if channels.contains_key(&spec.name) {
            return Err(ChannelError::NameInUse(spec.name.clone()));
        }

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        channels.insert(
            spec.name.clone(),
            Entry {
                weak: tx.downgrade(),
                first: Some(tx),
            },
        );
        debug!(channel = %spec.name, "Channel registered");

        Ok(MemoryChannel {
            name: spec.name.clone(),
            max_msg: spec.max_msg,
            rx,
            pending: None,
            namespace: self.clone(),
        })
    }

    /// Connect a client to a registered channel.
    ///
    /// Fails with `NotFound` if no such channel is registered, or if it was
    /// shut down or all of its clients already left.
    pub fn connect(&self, name: &str) -> Result<MemoryClient, ChannelError> {
        let mut channels = self.lock();
        let tx = channels.get_mut(name).and_then(|entry| match entry.first.take() {
            Some(tx) => Some(tx),
            None => entry.weak.upgrade(),
        });
        tx.map(|tx| MemoryClient { tx })
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))
    }

    /// Stop accepting new clients on a channel.
    ///
    /// Connected clients keep working; once they are all dropped the server
    /// side sees the channel as closed. The name stays reserved until the
    /// server side is dropped.
    pub fn shutdown(&self, name: &str) {
        if let Some(entry) = self.lock().get_mut(name) {
            entry.first = None;
            entry.weak = mpsc::channel(1).0.downgrade();
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Server side of an in-process channel.
pub struct MemoryChannel {
    name: String,
    max_msg: usize,
    rx: mpsc::Receiver<Envelope>,
    pending: Option<oneshot::Sender<String>>,
    namespace: Namespace,
}

impl RpcChannel for MemoryChannel {
    async fn recv(&mut self, buf: &mut String) -> Result<usize, RecvError> {
        buf.clear();
        self.pending = None;

        match self.rx.recv().await {
            None => Err(RecvError::Closed),
            Some(Envelope::Eof) => Err(RecvError::Eof),
            Some(Envelope::Request { payload, reply }) => {
                if payload.len() > self.max_msg {
                    return Err(RecvError::TooLarge {
                        len: payload.len(),
                        max: self.max_msg,
                    });
                }
                buf.push_str(&payload);
                self.pending = Some(reply);
                Ok(payload.len())
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
        let pending = self.pending.take().ok_or(SendError::Closed)?;
        pending
            .send(reply.to_string())
            .map_err(|_| SendError::Closed)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.namespace.lock().remove(&self.name);
    }
}

/// Client side of an in-process channel.
#[derive(Clone)]
pub struct MemoryClient {
    tx: mpsc::Sender<Envelope>,
}

impl MemoryClient {
    /// Send a request and wait for its reply.
    pub async fn call(&self, request: &str) -> Result<String, SendError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope::Request {
                payload: request.to_string(),
                reply,
            })
            .await
            .map_err(|_| SendError::Closed)?;
        response.await.map_err(|_| SendError::Closed)
    }

    /// Signal end-of-stream to the server.
    pub async fn close(self) -> Result<(), SendError> {
        self.tx
            .send(Envelope::Eof)
            .await
            .map_err(|_| SendError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let ns = Namespace::new();
        let spec = ChannelSpec::default();

        let channel = ns.serve(&spec).unwrap();
        assert!(matches!(ns.serve(&spec), Err(ChannelError::NameInUse(_))));

        drop(channel);
        assert!(!ns.contains("maxMsgSrv"));
        assert!(ns.serve(&spec).is_ok());
    }

    #[test]
    fn test_connect_unknown_name() {
        let ns = Namespace::new();
        assert!(matches!(
            ns.connect("nobody"),
            Err(ChannelError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_request_reply() {
        let ns = Namespace::new();
        let mut channel = ns.serve(&ChannelSpec::default()).unwrap();
        let client = ns.connect("maxMsgSrv").unwrap();

        let server = async {
            let mut buf = String::new();
            let n = channel.recv(&mut buf).await.unwrap();
            assert_eq!(n, 2);
            channel.send(&buf.to_uppercase()).await.unwrap();
            channel.recv(&mut buf).await
        };
        let caller = async {
            let reply = client.call("hi").await.unwrap();
            client.close().await.unwrap();
            reply
        };

        let (last, reply) = tokio::join!(server, caller);
        assert_eq!(reply, "HI");
        assert!(matches!(last, Err(RecvError::Eof)));
    }

    #[tokio::test]
    async fn test_oversize_request_is_rejected() {
        let ns = Namespace::new();
        let mut channel = ns
            .serve(&ChannelSpec::new("small").with_max_msg(4))
            .unwrap();
        let client = ns.connect("small").unwrap();

        let (received, reply) = tokio::join!(
            async {
                let mut buf = String::new();
                channel.recv(&mut buf).await
            },
            client.call("hello")
        );
        assert!(matches!(
            received,
            Err(RecvError::TooLarge { len: 5, max: 4 })
        ));
        assert!(matches!(reply, Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn test_dropped_clients_close_the_channel() {
        let ns = Namespace::new();
        let mut channel = ns.serve(&ChannelSpec::default()).unwrap();
        let first = ns.connect("maxMsgSrv").unwrap();
        let second = ns.connect("maxMsgSrv").unwrap();
        drop(first);
        drop(second);

        let mut buf = String::new();
        assert!(matches!(channel.recv(&mut buf).await, Err(RecvError::Closed)));
        assert!(matches!(
            ns.connect("maxMsgSrv"),
            Err(ChannelError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cloned_client_keeps_channel_open() {
        let ns = Namespace::new();
        let mut channel = ns.serve(&ChannelSpec::default()).unwrap();
        let client = ns.connect("maxMsgSrv").unwrap();
        let other = client.clone();
        drop(client);

        let (received, reply) = tokio::join!(
            async {
                let mut buf = String::new();
                let n = channel.recv(&mut buf).await.unwrap();
                channel.send(&buf).await.unwrap();
                n
            },
            other.call("still here")
        );
        assert_eq!(received, 10);
        assert_eq!(reply.unwrap(), "still here");
    }

    #[tokio::test]
    async fn test_shutdown_closes_after_clients_leave() {
        let ns = Namespace::new();
        let mut channel = ns.serve(&ChannelSpec::default()).unwrap();
        ns.shutdown("maxMsgSrv");

        let mut buf = String::new();
        assert!(matches!(channel.recv(&mut buf).await, Err(RecvError::Closed)));
    }
}
