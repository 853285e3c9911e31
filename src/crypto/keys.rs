//! X25519 key agreement and the rendezvous key schedule.
//!
//! ```text
//! RIDAK | RRDAK = HKDF-SHA256(ikm = AK, info = "rendezvous v1 rida" | "rendezvous v1 rrda")
//! STK           = HKDF-SHA256(salt = AK, ikm = X25519(ETK_rid, ETK_rrd), info = "rendezvous v1 st")
//! RIDTK | RRDTK = HKDF-Expand(STK, "rendezvous v1 ridt" | "rendezvous v1 rrdt")
//! RPH           = BLAKE2s-256("rendezvous v1 rph" || STK)
//! ```

use std::fmt;

use blake2::{Blake2s256, Digest};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use super::aead::FrameKey;
use crate::core::{
    AEAD_KEY_SIZE, AuthenticationKey, CryptoError, PUBLIC_KEY_SIZE, RPH_SIZE, Role,
    RoomPhraseHash,
};

const LABEL_RID_AUTH: &[u8] = b"rendezvous v1 rida";
const LABEL_RRD_AUTH: &[u8] = b"rendezvous v1 rrda";
const LABEL_SHARED: &[u8] = b"rendezvous v1 st";
const LABEL_RID_TRANSPORT: &[u8] = b"rendezvous v1 ridt";
const LABEL_RRD_TRANSPORT: &[u8] = b"rendezvous v1 rrdt";
const LABEL_RPH: &[u8] = b"rendezvous v1 rph";

/// A single-use X25519 keypair (ETK).
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Consume the keypair and compute the shared secret with `peer`.
    ///
    /// Rejects low-order peer keys that would yield an all-zero secret.
    pub fn diffie_hellman(
        self,
        peer: &[u8; PUBLIC_KEY_SIZE],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

fn expand(hk: &Hkdf<Sha256>, label: &[u8]) -> Result<FrameKey, CryptoError> {
    let mut key = Zeroizing::new([0u8; AEAD_KEY_SIZE]);
    hk.expand(label, key.as_mut_slice())
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(FrameKey::from_bytes(*key))
}

/// Keys derived from the authentication key, shared by every path.
///
/// They protect the first handshake message in each direction.
#[derive(Debug, Clone)]
pub struct AuthKeys {
    rid: FrameKey,
    rrd: FrameKey,
}

impl AuthKeys {
    /// Derive from the authentication key.
    pub fn derive(ak: &AuthenticationKey) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, ak.as_bytes());
        Ok(Self {
            rid: expand(&hk, LABEL_RID_AUTH)?,
            rrd: expand(&hk, LABEL_RRD_AUTH)?,
        })
    }

    /// Key used by `role` to send.
    pub fn for_sender(&self, role: Role) -> &FrameKey {
        match role {
            Role::Initiator => &self.rid,
            Role::Responder => &self.rrd,
        }
    }
}

/// Keys of one path after its key exchange.
#[derive(Debug)]
pub struct PathKeys {
    rid: FrameKey,
    rrd: FrameKey,
    rph: RoomPhraseHash,
}

impl PathKeys {
    /// Derive from the authentication key and the path's X25519 secret.
    pub fn derive(ak: &AuthenticationKey, shared_secret: &[u8; 32]) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(ak.as_bytes()), shared_secret);
        let mut stk = Zeroizing::new([0u8; 32]);
        hk.expand(LABEL_SHARED, stk.as_mut_slice())
            .map_err(|_| CryptoError::KeyDerivationFailed)?;

        let hk =
            Hkdf::<Sha256>::from_prk(stk.as_slice()).map_err(|_| CryptoError::KeyDerivationFailed)?;

        let mut hasher = Blake2s256::new();
        hasher.update(LABEL_RPH);
        hasher.update(stk.as_slice());
        let rph: [u8; RPH_SIZE] = hasher.finalize().into();

        Ok(Self {
            rid: expand(&hk, LABEL_RID_TRANSPORT)?,
            rrd: expand(&hk, LABEL_RRD_TRANSPORT)?,
            rph: RoomPhraseHash::from_bytes(rph),
        })
    }

    /// Transport key used by `role` to send.
    pub fn for_sender(&self, role: Role) -> &FrameKey {
        match role {
            Role::Initiator => &self.rid,
            Role::Responder => &self.rrd,
        }
    }

    /// Rendezvous Path Hash of this path.
    pub fn rph(&self) -> RoomPhraseHash {
        self.rph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ak(byte: u8) -> AuthenticationKey {
        AuthenticationKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_key_agreement() {
        let rid = EphemeralKeypair::generate();
        let rrd = EphemeralKeypair::generate();
        let rid_public = rid.public_key();
        let rrd_public = rrd.public_key();

        let rid_secret = rid.diffie_hellman(&rrd_public).unwrap();
        let rrd_secret = rrd.diffie_hellman(&rid_public).unwrap();
        assert_eq!(*rid_secret, *rrd_secret);

        let rid_keys = PathKeys::derive(&ak(1), &rid_secret).unwrap();
        let rrd_keys = PathKeys::derive(&ak(1), &rrd_secret).unwrap();
        assert_eq!(rid_keys.rph(), rrd_keys.rph());
        assert_eq!(
            rid_keys.for_sender(Role::Initiator).as_bytes(),
            rrd_keys.for_sender(Role::Initiator).as_bytes()
        );
    }

    #[test]
    fn test_direction_keys_differ() {
        let keys = AuthKeys::derive(&ak(1)).unwrap();
        assert_ne!(
            keys.for_sender(Role::Initiator).as_bytes(),
            keys.for_sender(Role::Responder).as_bytes()
        );

        let keys = PathKeys::derive(&ak(1), &[9; 32]).unwrap();
        assert_ne!(
            keys.for_sender(Role::Initiator).as_bytes(),
            keys.for_sender(Role::Responder).as_bytes()
        );
    }

    #[test]
    fn test_authentication_key_binds_schedule() {
        let a = PathKeys::derive(&ak(1), &[9; 32]).unwrap();
        let b = PathKeys::derive(&ak(2), &[9; 32]).unwrap();
        assert_ne!(a.rph(), b.rph());

        let a = AuthKeys::derive(&ak(1)).unwrap();
        let b = AuthKeys::derive(&ak(2)).unwrap();
        assert_ne!(
            a.for_sender(Role::Responder).as_bytes(),
            b.for_sender(Role::Responder).as_bytes()
        );
    }

    #[test]
    fn test_schedule_is_deterministic() {
        let a = PathKeys::derive(&ak(3), &[5; 32]).unwrap();
        let b = PathKeys::derive(&ak(3), &[5; 32]).unwrap();
        assert_eq!(a.rph(), b.rph());
    }

    #[test]
    fn test_low_order_point_rejected() {
        let keypair = EphemeralKeypair::generate();
        let result = keypair.diffie_hellman(&[0u8; PUBLIC_KEY_SIZE]);
        assert!(matches!(result, Err(CryptoError::NonContributory)));
    }
}
