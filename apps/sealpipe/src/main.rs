//! Sealpipe
//!
//! Encrypted echo server and one-shot client.
//!
//! ```text
//! sealpipe -l 7000            # serve on port 7000
//! sealpipe 7000 "hello"       # send one message, print the echo
//! ```

use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use secure_channel::{ChannelConfig, ServeConfig, Server, dial};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "sealpipe", version, about = "Encrypted echo server and client")]
struct Cli {
    /// Listen mode. Serve on the given port
    #[arg(short = 'l', long = "listen", value_name = "PORT")]
    listen: Option<u16>,

    /// Port to dial in client mode
    #[arg(required_unless_present = "listen")]
    port: Option<u16>,

    /// Message to send in client mode
    #[arg(required_unless_present = "listen")]
    message: Option<String>,

    /// Host to dial in client mode
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Maximum connections served at once
    #[arg(long, default_value_t = 1024)]
    max_connections: usize,

    /// Seconds allowed for the key exchange
    #[arg(long, default_value_t = 10)]
    handshake_timeout: u64,

    /// Seconds a connection may sit idle; 0 disables the limit
    #[arg(long, default_value_t = 300)]
    idle_timeout: u64,
}

impl Cli {
    fn channel_config(&self) -> ChannelConfig {
        let idle = (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout));

        ChannelConfig::default()
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout))
            .with_io_timeout(idle)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries only the echoed message
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sealpipe=info".parse()?)
                .add_directive("secure_channel=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(port) = cli.listen {
        return run_server(&cli, port).await;
    }

    let (Some(port), Some(message)) = (cli.port, cli.message.as_deref()) else {
        bail!("usage: sealpipe <port> <message>");
    };

    run_client(&cli, port, message).await
}

async fn run_server(cli: &Cli, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to listen on port {}", port))?;

    let config = ServeConfig::default()
        .with_channel(cli.channel_config())
        .with_max_connections(cli.max_connections);

    let server = Server::new(listener, config).context("failed to generate server keys")?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                shutdown.shutdown();
            }
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
    });

    server.run().await.context("server stopped")
}

async fn run_client(cli: &Cli, port: u16, message: &str) -> anyhow::Result<()> {
    let addr = format!("{}:{}", cli.host, port);

    let mut channel = dial(addr.as_str(), &cli.channel_config())
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    channel
        .send(message.as_bytes())
        .await
        .context("failed to send message")?;

    let reply = channel
        .recv(message.len())
        .await
        .context("failed to read reply")?;

    println!("{}", String::from_utf8_lossy(&reply));

    if let Err(e) = channel.close().await {
        warn!("Close failed: {}", e);
    }

    Ok(())
}
