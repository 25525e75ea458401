//! Client side of the secure channel

use std::fmt::Display;
use std::sync::Arc;

use crypto_session::{KeyPair, PublicKey, SessionKeys};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::{ChannelConfig, ChannelError, ChannelResult, SecureFrameReader, SecureFrameWriter, handshake};

/// An established, encrypted, bidirectional channel
pub struct SecureChannel<S> {
    reader: SecureFrameReader<ReadHalf<S>>,
    writer: SecureFrameWriter<WriteHalf<S>>,
    keys: Arc<SessionKeys>,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake over `stream` and bind session keys
    ///
    /// No frame is read or written before both public keys are known.
    pub async fn establish(mut stream: S, keypair: &KeyPair, config: &ChannelConfig) -> ChannelResult<Self> {
        let peer = handshake::perform(&mut stream, keypair, config.handshake_timeout).await?;
        let keys = Arc::new(SessionKeys::bind(keypair, peer)?);

        let (read_half, write_half) = tokio::io::split(stream);

        Ok(Self {
            reader: SecureFrameReader::new(read_half, keys.clone(), config),
            writer: SecureFrameWriter::new(write_half, keys.clone(), config),
            keys,
        })
    }

    /// Encrypt and send one message, returning its plaintext length
    pub async fn send(&mut self, message: &[u8]) -> ChannelResult<usize> {
        self.writer.write_message(message).await
    }

    /// Receive one message of at most `capacity` bytes
    pub async fn recv(&mut self, capacity: usize) -> ChannelResult<Vec<u8>> {
        self.reader.read_message(capacity).await
    }

    /// Receive one message into `buf`
    pub async fn recv_into(&mut self, buf: &mut [u8]) -> ChannelResult<usize> {
        self.reader.read_into(buf).await
    }

    /// Shut down the underlying stream
    pub async fn close(mut self) -> ChannelResult<()> {
        self.writer.shutdown().await
    }

    pub fn local_public_key(&self) -> PublicKey {
        self.keys.local_public()
    }

    pub fn peer_public_key(&self) -> PublicKey {
        self.keys.remote_public()
    }

    /// Split into independently owned reader and writer halves
    pub fn split(self) -> (SecureFrameReader<ReadHalf<S>>, SecureFrameWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

/// Connect to `addr` with a fresh ephemeral key pair
pub async fn dial<A>(addr: A, config: &ChannelConfig) -> ChannelResult<SecureChannel<TcpStream>>
where
    A: ToSocketAddrs + Display,
{
    let keypair = KeyPair::generate()?;
    let target = addr.to_string();

    debug!("Connecting to {}", target);

    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ChannelError::Timeout {
            operation: "connect",
            after: config.connect_timeout,
        })?
        .map_err(|source| ChannelError::Connect {
            addr: target.clone(),
            source,
        })?;

    stream.set_nodelay(true).map_err(ChannelError::read)?;

    let channel = SecureChannel::establish(stream, &keypair, config).await?;
    info!("Secure channel to {} established, peer key {}", target, channel.peer_public_key());

    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channels_exchange_messages() {
        let (a, b) = tokio::io::duplex(1024);
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let config = ChannelConfig::default();

        let (alice_channel, bob_channel) = tokio::join!(
            SecureChannel::establish(a, &alice, &config),
            SecureChannel::establish(b, &bob, &config),
        );
        let mut alice_channel = alice_channel.unwrap();
        let mut bob_channel = bob_channel.unwrap();

        assert_eq!(alice_channel.peer_public_key(), bob.public_key());
        assert_eq!(bob_channel.peer_public_key(), alice.public_key());
        assert_eq!(alice_channel.local_public_key(), alice.public_key());

        assert_eq!(alice_channel.send(b"ping").await.unwrap(), 4);
        assert_eq!(bob_channel.recv(4).await.unwrap(), b"ping");

        bob_channel.send(b"pong").await.unwrap();
        let mut buf = [0u8; 16];
        let n = alice_channel.recv_into(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");

        alice_channel.close().await.unwrap();
        assert!(bob_channel.recv(16).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_low_order_peer_key_fails_handshake() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (ours, mut theirs) = tokio::io::duplex(1024);
        let local = KeyPair::generate().unwrap();

        let peer = tokio::spawn(async move {
            theirs.write_all(&[0u8; 32]).await.unwrap();
            let mut key = [0u8; 32];
            theirs.read_exact(&mut key).await.unwrap();
            key
        });

        let err = SecureChannel::establish(ours, &local, &ChannelConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChannelError::Handshake(_)));
        assert_eq!(&peer.await.unwrap(), local.public_key().as_bytes());
    }

    #[tokio::test]
    async fn test_unwritable_stream_fails_handshake() {
        let (ours, theirs) = tokio::io::duplex(1024);
        drop(theirs);
        let local = KeyPair::generate().unwrap();

        let err = SecureChannel::establish(ours, &local, &ChannelConfig::default())
            .await
            .err()
            .unwrap();
        match err {
            ChannelError::Handshake(msg) => assert!(msg.starts_with("write public key")),
            other => panic!("expected handshake error, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_dial_unreachable_address() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dial(addr, &ChannelConfig::default()).await.err().unwrap();
        assert!(matches!(err, ChannelError::Connect { .. }));
    }
}
