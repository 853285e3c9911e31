//! XChaCha20-Poly1305 AEAD encryption
//!
//! Every rendezvous frame is sealed with XChaCha20-Poly1305 under a key that
//! belongs to exactly one sender. [`CipherState`] couples such a key with its
//! nonce counter so a nonce is never used twice.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::nonce::{Direction, construct_nonce};
use crate::core::{AEAD_KEY_SIZE, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError, PathId};

/// A frame encryption key.
///
/// Zeroized on drop for security.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FrameKey {
    key: [u8; AEAD_KEY_SIZE],
}

impl FrameKey {
    /// Create a key from bytes.
    pub fn from_bytes(key: [u8; AEAD_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; AEAD_KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for FrameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FrameKey(..)")
    }
}

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// Returns the ciphertext with the 16-byte Poly1305 tag appended.
pub fn encrypt(
    key: &FrameKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt ciphertext using XChaCha20-Poly1305.
///
/// Fails if the tag does not authenticate.
pub fn decrypt(
    key: &FrameKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// One direction of one path: a key plus its nonce counter.
///
/// Counters are strictly sequential, so replayed, reordered or dropped
/// frames fail to authenticate.
#[derive(Debug)]
pub struct CipherState {
    key: FrameKey,
    pid: PathId,
    direction: Direction,
    counter: u64,
}

impl CipherState {
    /// Start a cipher state at counter zero.
    pub fn new(key: FrameKey, pid: PathId, direction: Direction) -> Self {
        Self::with_counter(key, pid, direction, 0)
    }

    /// Start a cipher state at `counter`.
    pub fn with_counter(key: FrameKey, pid: PathId, direction: Direction, counter: u64) -> Self {
        Self {
            key,
            pid,
            direction,
            counter,
        }
    }

    /// Next counter value.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn next_nonce(&mut self) -> Result<[u8; AEAD_NONCE_SIZE], CryptoError> {
        if self.counter == u64::MAX {
            return Err(CryptoError::CounterExhaustion);
        }
        let nonce = construct_nonce(self.pid, self.direction, self.counter);
        self.counter += 1;
        Ok(nonce)
    }

    /// Encrypt with the next nonce.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        encrypt(&self.key, &nonce, plaintext)
    }

    /// Decrypt with the next nonce.
    ///
    /// The counter only advances when the frame authenticates.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.counter == u64::MAX {
            return Err(CryptoError::CounterExhaustion);
        }
        let nonce = construct_nonce(self.pid, self.direction, self.counter);
        let plaintext = decrypt(&self.key, &nonce, ciphertext)?;
        self.counter += 1;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> FrameKey {
        FrameKey::from_bytes([byte; AEAD_KEY_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt() {
        let nonce = [0x01; AEAD_NONCE_SIZE];
        let ciphertext = encrypt(&key(0x42), &nonce, b"rendezvous").unwrap();
        assert_eq!(ciphertext.len(), b"rendezvous".len() + AEAD_TAG_SIZE);

        let decrypted = decrypt(&key(0x42), &nonce, &ciphertext).unwrap();
        assert_eq!(decrypted, b"rendezvous");
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let nonce = [0x01; AEAD_NONCE_SIZE];
        let ciphertext = encrypt(&key(0x42), &nonce, b"secret").unwrap();
        let result = decrypt(&key(0x43), &nonce, &ciphertext);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_decrypt_corrupted_ciphertext_fails() {
        let nonce = [0x01; AEAD_NONCE_SIZE];
        let mut ciphertext = encrypt(&key(0x42), &nonce, b"secret").unwrap();
        ciphertext[0] ^= 0xFF;
        assert!(matches!(
            decrypt(&key(0x42), &nonce, &ciphertext),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_decrypt_short_ciphertext_fails() {
        let nonce = [0x01; AEAD_NONCE_SIZE];
        assert!(matches!(
            decrypt(&key(0x42), &nonce, &[0u8; AEAD_TAG_SIZE - 1]),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_cipher_state_sequence() {
        let mut sender = CipherState::new(key(7), 3, Direction::InitiatorToResponder);
        let mut receiver = CipherState::new(key(7), 3, Direction::InitiatorToResponder);

        let first = sender.seal(b"one").unwrap();
        let second = sender.seal(b"two").unwrap();
        assert_eq!(sender.counter(), 2);

        assert_eq!(receiver.open(&first).unwrap(), b"one");
        assert_eq!(receiver.open(&second).unwrap(), b"two");
    }

    #[test]
    fn test_cipher_state_rejects_replay() {
        let mut sender = CipherState::new(key(7), 3, Direction::InitiatorToResponder);
        let mut receiver = CipherState::new(key(7), 3, Direction::InitiatorToResponder);

        let frame = sender.seal(b"once").unwrap();
        receiver.open(&frame).unwrap();
        assert!(receiver.open(&frame).is_err());
        // A failed open does not advance the counter
        assert_eq!(receiver.counter(), 1);
    }

    #[test]
    fn test_cipher_state_binds_path() {
        let mut sender = CipherState::new(key(7), 1, Direction::InitiatorToResponder);
        let mut receiver = CipherState::new(key(7), 2, Direction::InitiatorToResponder);
        let frame = sender.seal(b"wrong path").unwrap();
        assert!(receiver.open(&frame).is_err());
    }

    #[test]
    fn test_counter_exhaustion() {
        let mut state =
            CipherState::with_counter(key(1), 1, Direction::InitiatorToResponder, u64::MAX);
        assert!(matches!(
            state.seal(b"x"),
            Err(CryptoError::CounterExhaustion)
        ));
    }
}
