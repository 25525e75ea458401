//! Per-connection session keys with X25519 + XChaCha20Poly1305

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::keys::fill_random;
use crate::{CryptoError, CryptoResult, KeyPair, NONCE_SIZE, PublicKey, SHARED_KEY_SIZE, TAG_SIZE};

/// HKDF info label for the box key
const BOX_KEY_INFO: &[u8] = b"sealpipe box key v1";

/// Draw a fresh random nonce
pub fn random_nonce() -> CryptoResult<[u8; NONCE_SIZE]> {
    let mut nonce = [0u8; NONCE_SIZE];
    fill_random(&mut nonce)?;
    Ok(nonce)
}

/// A sealed message: the nonce it was sealed under and the ciphertext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the 16-byte tag appended
    pub ciphertext: Vec<u8>,
}

/// Keys bound to one connection after the handshake
///
/// Holds the symmetric key derived from `DH(local secret, remote public)`.
/// Both peers derive the same key, so a message sealed by one side opens on
/// the other. Immutable once bound.
pub struct SessionKeys {
    local_public: PublicKey,
    remote_public: PublicKey,
    cipher: XChaCha20Poly1305,
}

impl SessionKeys {
    /// Bind our key pair to the peer's public key
    ///
    /// Fails with [`CryptoError::NonContributory`] when the peer key is a
    /// low-order point, which would make the shared secret all zeros.
    pub fn bind(local: &KeyPair, remote_public: PublicKey) -> CryptoResult<Self> {
        let shared = local.secret().diffie_hellman(&remote_public.to_dalek());
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }

        let local_public = local.public_key();
        let key = derive_box_key(shared.as_bytes(), &local_public, &remote_public)?;

        let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        debug!("Session keys bound for peer {}", remote_public);

        Ok(Self {
            local_public,
            remote_public,
            cipher,
        })
    }

    pub fn local_public(&self) -> PublicKey {
        self.local_public
    }

    pub fn remote_public(&self) -> PublicKey {
        self.remote_public
    }

    /// Seal `plaintext` under a freshly drawn nonce
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Sealed> {
        let nonce = random_nonce()?;
        let ciphertext = self.seal_with_nonce(&nonce, plaintext)?;
        Ok(Sealed { nonce, ciphertext })
    }

    fn seal_with_nonce(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Verify and decrypt a ciphertext
    ///
    /// Returns no plaintext at all unless the tag verifies.
    pub fn open(&self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Authentication);
        }

        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Authentication)
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("local_public", &self.local_public)
            .field("remote_public", &self.remote_public)
            .finish_non_exhaustive()
    }
}

/// Expand the raw DH output into the box key
///
/// Both public keys go into the info string in a fixed order so the two
/// peers derive the same key.
fn derive_box_key(
    shared: &[u8; 32],
    local_public: &PublicKey,
    remote_public: &PublicKey,
) -> CryptoResult<Zeroizing<[u8; SHARED_KEY_SIZE]>> {
    let (first, second) = if local_public.as_bytes() <= remote_public.as_bytes() {
        (local_public, remote_public)
    } else {
        (remote_public, local_public)
    };

    let mut info = Vec::with_capacity(BOX_KEY_INFO.len() + 64);
    info.extend_from_slice(BOX_KEY_INFO);
    info.extend_from_slice(first.as_bytes());
    info.extend_from_slice(second.as_bytes());

    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut key = Zeroizing::new([0u8; SHARED_KEY_SIZE]);
    hk.expand(&info, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(key)
}
