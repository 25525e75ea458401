//! Channel and server configuration

use std::future::Future;
use std::time::Duration;

use shared_protocol::DEFAULT_MAX_MESSAGE_LEN;
use tokio::sync::Semaphore;

use crate::{ChannelError, ChannelResult};

/// Per-connection configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Deadline for establishing the TCP connection when dialing
    pub connect_timeout: Duration,
    /// Deadline for the public key exchange
    pub handshake_timeout: Duration,
    /// Deadline for each frame read or write; `None` waits forever
    pub io_timeout: Option<Duration>,
    /// Largest plaintext accepted in a single frame
    pub max_message_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            io_timeout: Some(Duration::from_secs(300)),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

impl ChannelConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Settings applied to every accepted connection
    pub channel: ChannelConfig,
    /// Maximum number of connections served at once, clamped to
    /// `1..=Semaphore::MAX_PERMITS` when the server starts
    pub max_connections: usize,
    /// How long shutdown waits for active connections before aborting them
    pub shutdown_grace: Duration,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            max_connections: 1024,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ServeConfig {
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// At least one connection is always allowed
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = clamp_connections(max);
        self
    }

    /// Connection slots the server actually hands out
    pub(crate) fn connection_slots(&self) -> usize {
        clamp_connections(self.max_connections)
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

fn clamp_connections(max: usize) -> usize {
    max.clamp(1, Semaphore::MAX_PERMITS)
}

/// Run `fut` under an optional deadline
pub(crate) async fn with_deadline<F, T>(
    deadline: Option<Duration>,
    operation: &'static str,
    fut: F,
) -> ChannelResult<T>
where
    F: Future<Output = ChannelResult<T>>,
{
    match deadline {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| ChannelError::Timeout { operation, after })?,
        None => fut.await,
    }
}
