//! End-to-end tests against a real server on loopback TCP

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use secure_channel::{
    ChannelConfig, ChannelError, ConnectionRegistry, ConnectionState, PublicKey, ServeConfig,
    Server, ShutdownHandle, dial,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

struct RunningServer {
    addr: SocketAddr,
    public_key: PublicKey,
    registry: Arc<ConnectionRegistry>,
    shutdown: ShutdownHandle,
    handle: JoinHandle<Result<(), ChannelError>>,
}

async fn start_server(config: ServeConfig) -> RunningServer {
    let server = Server::bind("127.0.0.1:0", config).await.expect("bind failed");

    RunningServer {
        addr: server.local_addr().expect("no local addr"),
        public_key: server.public_key(),
        registry: server.registry(),
        shutdown: server.shutdown_handle(),
        handle: tokio::spawn(server.run()),
    }
}

/// Poll `condition` until it holds or a second has passed
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_echo_hello() {
    let server = start_server(ServeConfig::default()).await;

    let mut channel = dial(server.addr, &ChannelConfig::default())
        .await
        .expect("dial failed");

    assert_eq!(channel.send(b"hello").await.unwrap(), 5);
    let reply = channel.recv(5).await.unwrap();
    assert_eq!(reply, b"hello");

    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_handshake_keys_match() {
    let server = start_server(ServeConfig::default()).await;

    let mut channel = dial(server.addr, &ChannelConfig::default()).await.unwrap();
    assert_eq!(channel.peer_public_key(), server.public_key);

    // One round trip guarantees the server side is active
    channel.send(b"sync").await.unwrap();
    channel.recv(4).await.unwrap();

    let client_key = channel.local_public_key();
    let seen = server
        .registry
        .snapshot()
        .into_iter()
        .find(|info| info.peer_public_key == Some(client_key))
        .expect("server did not record the client key");
    assert_eq!(seen.state, ConnectionState::Active);
}

#[tokio::test]
async fn test_each_dial_uses_fresh_keys() {
    let server = start_server(ServeConfig::default()).await;

    let first = dial(server.addr, &ChannelConfig::default()).await.unwrap();
    let second = dial(server.addr, &ChannelConfig::default()).await.unwrap();

    assert_ne!(first.local_public_key(), second.local_public_key());
    assert_eq!(first.peer_public_key(), second.peer_public_key());
}

#[tokio::test]
async fn test_messages_echo_in_order() {
    let server = start_server(ServeConfig::default()).await;
    let mut channel = dial(server.addr, &ChannelConfig::default()).await.unwrap();

    let messages: Vec<Vec<u8>> = (0..50)
        .map(|i| format!("message number {}", i).into_bytes())
        .collect();

    for message in &messages {
        channel.send(message).await.unwrap();
    }
    for message in &messages {
        assert_eq!(&channel.recv(64).await.unwrap(), message);
    }

    let large = vec![0xA5u8; 256 * 1024];
    channel.send(&large).await.unwrap();
    assert_eq!(channel.recv(large.len()).await.unwrap(), large);

    assert!(eventually(|| server.registry.stats().messages_echoed == 51).await);
}

#[tokio::test]
async fn test_concurrent_clients_are_isolated() {
    let server = start_server(ServeConfig::default()).await;
    let addr = server.addr;

    let clients = (0..20).map(|i| async move {
        let mut channel = dial(addr, &ChannelConfig::default()).await.unwrap();
        let message = format!("msg-{}", i);

        for _ in 0..5 {
            channel.send(message.as_bytes()).await.unwrap();
            let reply = channel.recv(message.len()).await.unwrap();
            assert_eq!(reply, message.as_bytes());
        }
        channel.close().await.unwrap();
    });

    join_all(clients).await;

    assert!(eventually(|| server.registry.is_empty()).await);
    let stats = server.registry.stats();
    assert_eq!(stats.accepted, 20);
    assert_eq!(stats.closed, 20);
    assert_eq!(stats.messages_echoed, 100);
}

#[tokio::test]
async fn test_bad_peer_does_not_affect_others() {
    let server = start_server(ServeConfig::default()).await;

    let mut good = dial(server.addr, &ChannelConfig::default()).await.unwrap();

    // Handshake properly, then send a frame that cannot authenticate
    let mut bad = TcpStream::connect(server.addr).await.unwrap();
    let mut server_key = [0u8; 32];
    bad.write_all(&[0x42u8; 32]).await.unwrap();
    bad.read_exact(&mut server_key).await.unwrap();
    assert_eq!(&server_key, server.public_key.as_bytes());

    let mut forged = Vec::new();
    forged.extend_from_slice(&(24u32 + 16 + 3).to_be_bytes());
    forged.extend_from_slice(&[7u8; 24 + 16 + 3]);
    bad.write_all(&forged).await.unwrap();

    // The server drops the bad connection without replying
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), bad.read_to_end(&mut rest)).await;
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));

    good.send(b"still here").await.unwrap();
    assert_eq!(good.recv(32).await.unwrap(), b"still here");

    let fresh = dial(server.addr, &ChannelConfig::default()).await;
    assert!(fresh.is_ok());
    assert!(!server.handle.is_finished());
}

#[tokio::test]
async fn test_incomplete_handshake_is_counted() {
    let server = start_server(ServeConfig::default()).await;

    let mut quitter = TcpStream::connect(server.addr).await.unwrap();
    quitter.write_all(&[1u8; 10]).await.unwrap();
    drop(quitter);

    assert!(eventually(|| server.registry.stats().handshakes_failed == 1).await);
    assert!(eventually(|| server.registry.is_empty()).await);
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let channel = ChannelConfig::default().with_handshake_timeout(Duration::from_millis(100));
    let server = start_server(ServeConfig::default().with_channel(channel)).await;

    let mut silent = TcpStream::connect(server.addr).await.unwrap();
    let mut server_key = [0u8; 32];
    silent.read_exact(&mut server_key).await.unwrap();

    // Never send our key; the server gives up and closes
    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), silent.read_to_end(&mut rest))
        .await
        .expect("server kept a silent peer open")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(eventually(|| server.registry.stats().handshakes_failed == 1).await);
}

#[tokio::test]
async fn test_connection_limit() {
    let server = start_server(ServeConfig::default().with_max_connections(1)).await;
    let quick = ChannelConfig::default().with_handshake_timeout(Duration::from_millis(200));

    let first = dial(server.addr, &quick).await.unwrap();

    // Accepted by the kernel but not served until a slot frees up
    let err = dial(server.addr, &quick).await.err().expect("second dial should stall");
    assert!(matches!(err, ChannelError::Timeout { operation: "handshake", .. }));

    first.close().await.unwrap();
    assert!(eventually(|| server.registry.stats().closed >= 1).await);

    let mut third = dial(server.addr, &ChannelConfig::default()).await.unwrap();
    third.send(b"room now").await.unwrap();
    assert_eq!(third.recv(8).await.unwrap(), b"room now");
}

#[tokio::test]
async fn test_out_of_range_connection_limits_still_serve() {
    let huge = ServeConfig::default().with_max_connections(usize::MAX);
    let zero = ServeConfig {
        max_connections: 0,
        ..ServeConfig::default()
    };

    for config in [huge, zero] {
        let server = start_server(config).await;

        let mut channel = dial(server.addr, &ChannelConfig::default()).await.unwrap();
        channel.send(b"limit").await.unwrap();
        assert_eq!(channel.recv(5).await.unwrap(), b"limit");
        assert!(!server.handle.is_finished());
    }
}

#[tokio::test]
async fn test_bind_failure_is_a_listen_error() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();

    let err = Server::bind(addr, ServeConfig::default()).await.err().unwrap();
    assert!(matches!(err, ChannelError::Listen(_)));
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let server = start_server(ServeConfig::default().with_shutdown_grace(Duration::from_secs(2))).await;

    let mut idle = dial(server.addr, &ChannelConfig::default()).await.unwrap();
    idle.send(b"before").await.unwrap();
    assert_eq!(idle.recv(6).await.unwrap(), b"before");

    server.shutdown.shutdown();
    assert!(server.shutdown.is_shutdown());

    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server did not stop")
        .expect("server task panicked");
    assert!(result.is_ok());

    // The server closed our connection on its way out
    let err = idle.recv(16).await.unwrap_err();
    assert!(err.is_closed());
    assert!(server.registry.is_empty());
}
