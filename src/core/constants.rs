//! Protocol constants for the Rendezvous Protocol.
//!
//! Transport tuning values are defaults only and can be overridden through
//! [`BackpressureConfig`](crate::transport::BackpressureConfig). Wire sizes
//! are fixed by the reference engine and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// KEYS AND HASHES
// =============================================================================

/// Rendezvous Authentication Key size.
pub const AUTHENTICATION_KEY_SIZE: usize = 32;

/// Rendezvous Path Hash size.
pub const RPH_SIZE: usize = 32;

/// XChaCha20 key size.
pub const AEAD_KEY_SIZE: usize = 32;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// XChaCha20 nonce size.
pub const AEAD_NONCE_SIZE: usize = 24;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Handshake challenge size.
pub const CHALLENGE_SIZE: usize = 16;

// =============================================================================
// NONCE DIRECTIONS
// =============================================================================

/// Nonce direction byte for RID → RRD frames.
pub const NONCE_DIR_INITIATOR: u8 = 0x00;

/// Nonce direction byte for RRD → RID frames.
pub const NONCE_DIR_RESPONDER: u8 = 0x01;

// =============================================================================
// FRAMING
// =============================================================================

/// Size of the little-endian length prefix in front of every frame.
pub const FRAME_LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum accepted frame length (excluding the length prefix).
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Outgoing ULP frames are handed to the nominated path in chunks of at
/// most this size.
pub const ULP_CHUNK_SIZE: usize = 1024 * 1024;

// =============================================================================
// MULTIPLEXER
// =============================================================================

/// Capacity of the hand-off queue shared by all path pumps.
///
/// A single slot keeps flow control intact: a pump blocks on the queue
/// before it blocks on the network.
pub const MULTIPLEXER_QUEUE_CAPACITY: usize = 1;

// =============================================================================
// BACKPRESSURE DEFAULTS
// =============================================================================

/// Default high watermark (2 MiB) at which writers are stalled.
pub const DEFAULT_HIGH_WATERMARK: usize = 2 * 1024 * 1024;

/// Default low watermark (128 KiB) at which stalled writers resume.
pub const DEFAULT_LOW_WATERMARK: usize = 128 * 1024;

/// Default interval at which a stalled writer re-checks the buffer.
///
/// Together with the watermarks this caps throughput at roughly 100 MiB/s.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

// =============================================================================
// TIMEOUTS
// =============================================================================

/// Default time allowed for a WebSocket path to connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a close frame to be flushed before a path is dropped.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
