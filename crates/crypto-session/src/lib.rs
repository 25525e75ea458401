//! Crypto Session - Public-key authenticated encryption for Sealpipe
//!
//! X25519 key agreement with XChaCha20Poly1305 sealing. Every message is
//! sealed under a fresh random 24-byte nonce, so a single key can serve both
//! directions of a connection without coordination.

mod error;
mod keys;
mod session;

pub use error::*;
pub use keys::*;
pub use session::*;

pub use shared_protocol::{NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE};

/// Secret key size (256 bits / 32 bytes)
pub const SECRET_KEY_SIZE: usize = 32;

/// Symmetric key size (256 bits / 32 bytes)
pub const SHARED_KEY_SIZE: usize = 32;
