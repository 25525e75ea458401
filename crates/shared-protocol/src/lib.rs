//! Shared Protocol Definitions for Sealpipe
//!
//! Wire-format constants, the frame header codec and the per-connection
//! state machine shared by the crypto and channel crates.

mod error;
mod state;
mod wire;

pub use error::*;
pub use state::*;
pub use wire::*;

/// Public key size on the wire (X25519, 32 bytes)
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Nonce size carried in every frame (XChaCha20, 192 bits / 24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size appended to every ciphertext (Poly1305, 16 bytes)
pub const TAG_SIZE: usize = 16;

/// Bytes a frame adds on top of its plaintext, excluding the length prefix
pub const FRAME_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Default upper bound on a single plaintext message (1 MiB)
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1 << 20;
