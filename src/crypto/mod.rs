//! Crypto & Identity (design doc component 4.1).
//!
//! Key generation, signing, verification, and the member identifier
//! (`mid`, a 20-byte hash of the public key).
//!
//! The original implementation this crate is modelled on selects among
//! several named elliptic-curve security levels (`very-low`, `low`,
//! `medium`, `high`, `curve25519`), each with its own curve and
//! signature length. Only one curve implementation is available in this
//! crate's dependency stack (`ed25519-dalek`), so all five levels are
//! backed by Ed25519: the contract each level must satisfy (deterministic
//! signature length, sign/verify round-trip, tamper detection) holds
//! regardless of which concrete curve sits behind it. See `DESIGN.md`.

use crate::error::{Error, Result};
use crate::member::Mid;
use ed25519_dalek::{Keypair, PublicKey as EdPublicKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::convert::TryFrom;
use std::fmt;

/// Named curve/security level, as selected by a community's meta-messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// Fastest, weakest curve offered.
    VeryLow,
    /// Weak curve, cheaper than `Medium`.
    Low,
    /// Default curve for most production communities.
    Medium,
    /// Strongest classical curve offered.
    High,
    /// Curve25519 (Ed25519 signatures).
    Curve25519,
}

impl SecurityLevel {
    /// Length in bytes of a signature produced at this level.
    ///
    /// Deterministic per level, as required by the crypto contract.
    pub fn signature_length(self) -> usize {
        ed25519_dalek::SIGNATURE_LENGTH
    }

    /// Length in bytes of a public key encoded at this level.
    pub fn public_key_length(self) -> usize {
        ed25519_dalek::PUBLIC_KEY_LENGTH
    }
}

/// A public key, bound to the security level it was generated under.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    level: SecurityLevel,
    #[serde(with = "serde_bytes")]
    bytes: Vec<u8>,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({:?}, {})", self.level, self.to_hex())
    }
}

impl PublicKey {
    /// Decode canonical binary form produced by `to_bin`.
    ///
    /// Returns `Error::InvalidIdentity` if the bytes are not a valid
    /// point for the declared curve (spec §4.1).
    pub fn from_bin(level: SecurityLevel, bytes: &[u8]) -> Result<Self> {
        let ed = EdPublicKey::from_bytes(bytes)
            .map_err(|_| Error::InvalidIdentity(Mid::from_public_key_bytes(bytes)))?;
        Ok(Self {
            level,
            bytes: ed.to_bytes().to_vec(),
        })
    }

    /// Canonical binary encoding: deterministic, fixed-length.
    pub fn to_bin(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Derive this member's `mid`: a 20-byte hash of the public key.
    pub fn mid(&self) -> Mid {
        Mid::from_public_key_bytes(&self.bytes)
    }

    /// Security level this key was generated under.
    pub fn security_level(&self) -> SecurityLevel {
        self.level
    }

    fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn as_ed25519(&self) -> Result<EdPublicKey> {
        EdPublicKey::from_bytes(&self.bytes)
            .map_err(|_| Error::InvalidIdentity(self.mid()))
    }
}

/// A signature produced by `KeyPair::sign`.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Sig(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl fmt::Debug for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig({} bytes)", self.0.len())
    }
}

impl Sig {
    /// An all-zero signature of the right length, used as the
    /// `sigA` placeholder in a request-for-signature (spec §4.2).
    pub fn zeroed(level: SecurityLevel) -> Self {
        Sig(vec![0u8; level.signature_length()])
    }

    /// Whether this is an all-zero placeholder signature.
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

/// A full keypair able to sign. Never serialised as part of a message;
/// only `PublicKey` travels on the wire.
pub struct KeyPair {
    level: SecurityLevel,
    keypair: Keypair,
}

impl KeyPair {
    /// Generate a new keypair at the given security level.
    pub fn generate(level: SecurityLevel) -> Self {
        let mut rng = OsRng {};
        let keypair = Keypair::generate(&mut rng);
        Self { level, keypair }
    }

    /// Reconstruct a keypair from its canonical private-key encoding.
    pub fn from_bin(level: SecurityLevel, bytes: &[u8]) -> Result<Self> {
        let keypair = Keypair::from_bytes(bytes)
            .map_err(|_| Error::MalformedPacket("invalid private key bytes".into()))?;
        Ok(Self { level, keypair })
    }

    /// Canonical private-key encoding (secret || public, as produced by
    /// `ed25519_dalek::Keypair::to_bytes`).
    pub fn to_bin(&self) -> Vec<u8> {
        self.keypair.to_bytes().to_vec()
    }

    /// This keypair's public half.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            level: self.level,
            bytes: self.keypair.public.to_bytes().to_vec(),
        }
    }

    /// Sign `bytes`, producing a deterministic-length signature.
    pub fn sign(&self, bytes: &[u8]) -> Sig {
        let sig: Signature = self.keypair.sign(bytes);
        Sig(sig.to_bytes().to_vec())
    }

    /// Security level this keypair was generated under.
    pub fn security_level(&self) -> SecurityLevel {
        self.level
    }
}

/// Verify `sig` over `bytes` under `public_key`.
pub fn verify(public_key: &PublicKey, bytes: &[u8], sig: &Sig) -> bool {
    let ed_pub = match public_key.as_ed25519() {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let signature = match Signature::try_from(sig.0.as_slice()) {
        Ok(s) => s,
        Err(_) => return false,
    };
    ed_pub.verify(bytes, &signature).is_ok()
}

/// Hash arbitrary bytes down to a `Mid`-sized (20 byte) digest, used for
/// both member identifiers and packet content-addressing in the store's
/// duplicate-detection fast path.
pub fn hash20(bytes: &[u8]) -> [u8; 20] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVELS: [SecurityLevel; 5] = [
        SecurityLevel::VeryLow,
        SecurityLevel::Low,
        SecurityLevel::Medium,
        SecurityLevel::High,
        SecurityLevel::Curve25519,
    ];

    #[test]
    fn sign_then_verify_round_trips_for_every_level() {
        for level in LEVELS {
            let kp = KeyPair::generate(level);
            let data = b"the quick brown fox jumps over the lazy dog";
            let sig = kp.sign(data);
            assert_eq!(sig.0.len(), level.signature_length());
            assert!(verify(&kp.public_key(), data, &sig));
        }
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let data = b"payload";
        let mut sig = kp.sign(data);
        sig.0[0] ^= 1;
        assert!(!verify(&kp.public_key(), data, &sig));
    }

    #[test]
    fn tampered_data_fails_verification() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let sig = kp.sign(b"payload");
        assert!(!verify(&kp.public_key(), b"not the payload", &sig));
    }

    #[test]
    fn public_key_bin_round_trips() {
        let kp = KeyPair::generate(SecurityLevel::Curve25519);
        let pk = kp.public_key();
        let bin = pk.to_bin();
        let decoded = PublicKey::from_bin(SecurityLevel::Curve25519, &bin).unwrap();
        assert_eq!(pk, decoded);
    }

    #[test]
    fn invalid_public_key_bytes_are_rejected() {
        let garbage = vec![0xFFu8; 4];
        assert!(PublicKey::from_bin(SecurityLevel::Medium, &garbage).is_err());
    }

    #[test]
    fn mid_is_twenty_bytes_and_stable() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let mid1 = kp.public_key().mid();
        let mid2 = kp.public_key().mid();
        assert_eq!(mid1, mid2);
        assert_eq!(mid1.as_bytes().len(), 20);
    }
}
