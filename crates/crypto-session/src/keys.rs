//! Long-lived and ephemeral X25519 key pairs

use rand::RngCore;
use rand::rngs::OsRng;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};

/// Fill `buf` from the operating system CSPRNG
pub(crate) fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::Randomness(e.to_string()))
}

/// A 32-byte X25519 public key as sent on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub(crate) fn to_dalek(self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Key pair for key agreement
///
/// The secret half is never cloned, serialized or printed; it is wiped from
/// memory when the pair is dropped. Share a pair between tasks with `Arc`.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random source
    pub fn generate() -> CryptoResult<Self> {
        let mut seed = Zeroizing::new([0u8; SECRET_KEY_SIZE]);
        fill_random(&mut seed[..])?;

        let secret = StaticSecret::from(*seed);
        let public = PublicKey(*x25519_dalek::PublicKey::from(&secret).as_bytes());

        Ok(Self { secret, public })
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}
