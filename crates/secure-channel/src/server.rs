//! Echo server: one key pair, one task per connection

use std::net::SocketAddr;
use std::sync::Arc;

use crypto_session::{KeyPair, PublicKey};
use shared_protocol::{ConnectionId, ConnectionState};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{ChannelConfig, ChannelError, ChannelResult, ConnectionRegistry, SecureChannel, ServeConfig};

/// Stops a running [`Server`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stop accepting and let active connections drain
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Secure echo server
///
/// Owns a single key pair for its whole lifetime; every accepted peer
/// handshakes against the same public key.
pub struct Server {
    listener: TcpListener,
    keypair: Arc<KeyPair>,
    config: ServeConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Wrap a bound listener, generating the server key pair
    pub fn new(listener: TcpListener, config: ServeConfig) -> ChannelResult<Self> {
        let keypair = KeyPair::generate()?;
        Ok(Self::with_keypair(listener, keypair, config))
    }

    /// Wrap a bound listener with an existing key pair
    pub fn with_keypair(listener: TcpListener, keypair: KeyPair, config: ServeConfig) -> Self {
        let (tx, _rx) = watch::channel(false);

        Self {
            listener,
            keypair: Arc::new(keypair),
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        }
    }

    /// Bind a listener on `addr`
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: ServeConfig) -> ChannelResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(ChannelError::Listen)?;
        Self::new(listener, config)
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn local_addr(&self) -> ChannelResult<SocketAddr> {
        self.listener.local_addr().map_err(ChannelError::Listen)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Live view of connections and counters
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Accept and serve connections until shutdown or an accept failure
    ///
    /// A failing connection only ever ends its own task. An error from
    /// `accept` itself stops the server and is returned after active
    /// connections have drained.
    pub async fn run(self) -> ChannelResult<()> {
        let local_addr = self.local_addr()?;
        info!(
            "Serving on {} with public key {}",
            local_addr,
            self.keypair.public_key()
        );

        let limiter = Arc::new(Semaphore::new(self.config.connection_slots()));
        let mut shutdown = self.shutdown.tx.subscribe();
        let mut tasks = JoinSet::new();

        let result = loop {
            while let Some(finished) = tasks.try_join_next() {
                log_task_exit(finished);
            }

            // Wait for a free slot before accepting so excess peers queue in
            // the listen backlog
            let permit = tokio::select! {
                _ = stopped(&mut shutdown) => break Ok(()),
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let (stream, peer_addr) = tokio::select! {
                _ = stopped(&mut shutdown) => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        break Err(ChannelError::Accept(e));
                    }
                },
            };

            let id = self.registry.register(peer_addr);
            let span = info_span!("conn", id = %id, peer = %peer_addr);
            let connection = Connection {
                id,
                keypair: self.keypair.clone(),
                config: self.config.channel.clone(),
                registry: self.registry.clone(),
                shutdown: shutdown.clone(),
                _permit: permit,
            };

            tasks.spawn(connection.serve(stream).instrument(span));
        };

        info!("Stopped accepting, draining {} connections", tasks.len());
        self.shutdown.shutdown();

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(finished) = tasks.join_next().await {
                log_task_exit(finished);
            }
        })
        .await;

        if drained.is_err() {
            warn!("Aborting {} connections after grace period", tasks.len());
            tasks.shutdown().await;
        }

        result
    }
}

/// Run a server with default configuration on `listener`
pub async fn serve(listener: TcpListener) -> ChannelResult<()> {
    Server::new(listener, ServeConfig::default())?.run().await
}

/// Resolves once shutdown has been requested
async fn stopped(rx: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which also ends the server
    let _ = rx.wait_for(|stop| *stop).await;
}

fn log_task_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Connection task panicked: {}", e);
        }
    }
}

/// State owned by one connection task
struct Connection {
    id: ConnectionId,
    keypair: Arc<KeyPair>,
    config: ChannelConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: watch::Receiver<bool>,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    async fn serve(mut self, stream: TcpStream) {
        info!("Accepted connection");

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        match self.echo(stream).await {
            Ok(()) => {}
            Err(ChannelError::Closed) => {}
            Err(e) => warn!("Connection failed: {}", e),
        }

        if let Some(info) = self.registry.close(self.id) {
            info!(
                "Connection closed after {} messages in {:?}",
                info.messages_echoed,
                info.age()
            );
        }
    }

    async fn echo(&mut self, stream: TcpStream) -> ChannelResult<()> {
        self.registry.transition(self.id, ConnectionState::Handshaking)?;

        let channel = SecureChannel::establish(stream, &self.keypair, &self.config).await?;
        let peer_key = channel.peer_public_key();
        self.registry.activate(self.id, peer_key)?;
        debug!("Handshake complete, peer key {}", peer_key);

        let (mut reader, mut writer) = channel.split();
        let capacity = self.config.max_message_len;

        loop {
            let message = tokio::select! {
                _ = stopped(&mut self.shutdown) => {
                    debug!("Server shutting down");
                    break;
                }
                read = reader.read_message(capacity) => match read {
                    Ok(message) => message,
                    Err(ChannelError::Closed) => {
                        debug!("Peer closed the stream");
                        break;
                    }
                    Err(e) => return Err(e),
                },
            };

            writer.write_message(&message).await?;
            self.registry.record_echo(self.id);
        }

        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown after close failed: {}", e);
        }

        Ok(())
    }
}
