//! AES-256-GCM sealing of journal payloads.
//!
//! A sealed payload is `nonce (12) || ciphertext || tag (16)`. Each seal uses
//! a fresh random nonce, so sealing the same bytes twice yields different
//! output.

use crate::error::{StorageError, StorageResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of a GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of a GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Associated data binding sealed payloads to the journal format.
const JOURNAL_AAD: &[u8] = b"calsync-journal-v1";

/// Key used to seal a replica at rest. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealingKey {
    bytes: [u8; KEY_SIZE],
}

impl SealingKey {
    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error unless `bytes` is exactly [`KEY_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::Sealing(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals and opens journal payloads.
pub struct Sealer {
    cipher: Aes256Gcm,
}

impl Sealer {
    /// Creates a sealer for `key`.
    #[must_use]
    pub fn new(key: &SealingKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(&key.bytes)),
        }
    }

    /// Encrypts and authenticates `plaintext`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cipher rejects the input.
    pub fn seal(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: JOURNAL_AAD,
                },
            )
            .map_err(|_| StorageError::Sealing("seal failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(ciphertext);
        Ok(out)
    }

    /// Verifies and decrypts a sealed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is truncated, was sealed with another
    /// key, or was tampered with.
    pub fn open(&self, sealed: &[u8]) -> StorageResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StorageError::Sealing("sealed payload too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: JOURNAL_AAD,
                },
            )
            .map_err(|_| StorageError::Sealing("open failed: wrong key or tampered payload".into()))
    }
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealer").finish_non_exhaustive()
    }
}
