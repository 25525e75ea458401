//! Public key exchange
//!
//! Each side writes its raw 32-byte public key, then reads the peer's. Both
//! roles run the same sequence; neither write waits on a read, so the two
//! sides cannot deadlock. Nothing here is authenticated: the keys are the
//! only content.

use std::time::Duration;

use crypto_session::{KeyPair, PUBLIC_KEY_SIZE, PublicKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::config::with_deadline;
use crate::{ChannelError, ChannelResult};

/// Send our public key and receive the peer's
pub async fn exchange_public_keys<S>(stream: &mut S, local: &KeyPair) -> ChannelResult<PublicKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(local.public_key().as_bytes())
        .await
        .map_err(|e| ChannelError::Handshake(format!("write public key: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| ChannelError::Handshake(format!("write public key: {}", e)))?;

    let mut peer = [0u8; PUBLIC_KEY_SIZE];
    stream
        .read_exact(&mut peer)
        .await
        .map_err(|e| ChannelError::Handshake(format!("read public key: {}", e)))?;

    let peer = PublicKey::from_bytes(peer);
    debug!("Received peer public key {}", peer);

    Ok(peer)
}

/// [`exchange_public_keys`] bounded by a deadline
pub async fn perform<S>(stream: &mut S, local: &KeyPair, timeout: Duration) -> ChannelResult<PublicKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_deadline(Some(timeout), "handshake", exchange_public_keys(stream, local)).await
}
