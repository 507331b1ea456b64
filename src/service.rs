//! Echo service.
//!
//! Receives one request at a time from a channel, logs it and sends the
//! same string back as the reply. The loop ends the first time a receive
//! fails; a failed send is logged and otherwise ignored.

use crate::channel::{ChannelSpec, RecvError, RpcChannel};
use tracing::{info, warn};

/// Loop state.
#[derive(Debug)]
enum ServiceState {
    Running,
    Terminated(RecvError),
}

/// Summary returned when the loop terminates.
#[derive(Debug)]
pub struct ServiceReport {
    /// Requests received and answered.
    pub requests: u64,
    /// Replies whose send failed.
    pub failed_sends: u64,
    /// The receive error that ended the loop.
    pub cause: RecvError,
}

impl ServiceReport {
    /// Whether the peer ended the stream rather than an error.
    pub fn is_clean(&self) -> bool {
        matches!(self.cause, RecvError::Eof | RecvError::Closed)
    }
}

pub struct EchoService<C> {
    channel: C,
    max_msg: usize,
}

impl<C: RpcChannel> EchoService<C> {
    /// `max_msg` sizes the reusable request buffer.
    pub fn new(channel: C, max_msg: usize) -> Self {
        Self { channel, max_msg }
    }

    pub fn from_spec(channel: C, spec: &ChannelSpec) -> Self {
        Self::new(channel, spec.max_msg)
    }

    /// Serve requests until the channel stops producing them.
    pub async fn run(mut self) -> ServiceReport {
        let name = self.channel.name().to_string();
        info!(channel = %name, max_msg = self.max_msg, "Hello!");

        let mut input = String::new();
        if let Err(e) = input.try_reserve(self.max_msg) {
            warn!(channel = %name, max_msg = self.max_msg, error = %e, "Request buffer grows on demand");
        }
        let mut requests = 0u64;
        let mut failed_sends = 0u64;
        let mut state = ServiceState::Running;

        let cause = loop {
            if let ServiceState::Terminated(cause) = state {
                break cause;
            }

            state = match self.channel.recv(&mut input).await {
                Ok(n) => {
                    requests += 1;
                    info!(channel = %name, bytes = n, input = %input, "Request received");

                    if let Err(e) = self.channel.send(&input).await {
                        failed_sends += 1;
                        warn!(channel = %name, error = %e, "Reply not delivered");
                    }
                    ServiceState::Running
                }
                Err(e) => ServiceState::Terminated(e),
            };
        };

        info!(channel = %name, requests, reason = %cause, "Goodbye!");

        ServiceReport {
            requests,
            failed_sends,
            cause,
        }
    }
}
