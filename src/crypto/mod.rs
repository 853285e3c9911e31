//! Cryptographic primitives of the reference protocol engine.
//!
//! - X25519 ephemeral key agreement
//! - HKDF-SHA256 key schedule keyed by the authentication key
//! - XChaCha20-Poly1305 frame encryption with per-path nonces
//! - BLAKE2s-256 path hash

mod aead;
mod keys;
mod nonce;

pub use aead::*;
pub use keys::*;
pub use nonce::*;
