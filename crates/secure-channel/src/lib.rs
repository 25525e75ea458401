//! Secure Channel - Encrypted message channel over byte streams
//!
//! Exchanges raw X25519 public keys, then carries one authenticated,
//! length-prefixed frame per message. [`dial`] opens a client channel;
//! [`Server`] accepts many peers concurrently and echoes their messages.

mod channel;
mod config;
mod error;
mod frame;
pub mod handshake;
mod registry;
mod server;

pub use channel::*;
pub use config::{ChannelConfig, ServeConfig};
pub use error::*;
pub use frame::*;
pub use registry::*;
pub use server::*;

pub use crypto_session::{KeyPair, PublicKey};
pub use shared_protocol::{ConnectionId, ConnectionState};
