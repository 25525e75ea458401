//! Crypto session error types

use thiserror::Error;

/// Cryptographic operation error
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Secure random source failed: {0}")]
    Randomness(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: authentication tag mismatch")]
    Authentication,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Key exchange produced a non-contributory shared secret")]
    NonContributory,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
