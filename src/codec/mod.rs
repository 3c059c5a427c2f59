//! Wire codec (design doc component 4.2).
//!
//! Packets are a concatenation of fixed-layout sections:
//! `community_prefix(20) || meta_marker || auth_bytes || distribution_bytes
//! || destination_bytes || payload || signature(s)`. Integers are
//! big-endian; `global_time` is unsigned 64-bit. Encoding is
//! deterministic — the same message always produces identical bytes.
//!
//! Verification re-serialises the prefix up to the first signature
//! offset to recompute the signed region, then checks the tail
//! signature(s) against it — mirroring how `WireMsg` in the teacher
//! separates header bytes from payload bytes before handing either to
//! the signer/verifier.

use crate::community::Cid;
use crate::crypto::{PublicKey, Sig};
use crate::member::Mid;
use crate::message::{Authority, Message};
use crate::meta_message::{Authentication, MetaMessage};
use std::convert::TryInto;
use thiserror::Error;

/// Errors specific to wire (de)serialisation. Converted into the
/// crate-wide `Error::MalformedPacket` / `Error::InvalidSignature` at
/// the boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("packet shorter than the fixed header")]
    Truncated,
    #[error("community prefix mismatch")]
    WrongCommunity,
    #[error("unknown meta-message marker {0}")]
    UnknownMeta(u8),
    #[error("signature section has the wrong length")]
    BadSignatureLength,
    #[error("public key bytes do not encode a valid point")]
    BadPublicKey,
}

impl From<CodecError> for crate::error::Error {
    fn from(err: CodecError) -> Self {
        crate::error::Error::MalformedPacket(err.to_string())
    }
}

type Result<T> = std::result::Result<T, CodecError>;

const CID_LEN: usize = 20;
const MID_LEN: usize = 20;

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn get_u64(buf: &[u8], at: usize) -> Result<u64> {
    let slice: [u8; 8] = buf
        .get(at..at + 8)
        .ok_or(CodecError::Truncated)?
        .try_into()
        .map_err(|_| CodecError::Truncated)?;
    Ok(u64::from_be_bytes(slice))
}

/// Encode one `Message` into its canonical wire form, given the
/// `MetaMessage` describing its kind and the public keys of its
/// signer(s) (needed because the wire format carries `Mid`s, not full
/// public keys, for the authentication section — identities are
/// resolved separately via `dispersy-identity`, as in the real system).
///
/// `meta_marker` is the byte identifying `meta.name` within the
/// community's catalogue (assigned by the caller, stable for the
/// community's life).
pub fn encode(msg: &Message, meta: &MetaMessage, meta_marker: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + msg.payload.len());
    buf.extend_from_slice(msg.community.as_bytes());
    buf.push(meta_marker);

    match &msg.authority {
        Authority::Member { signer, .. } => {
            buf.push(0); // auth kind: single member
            buf.extend_from_slice(signer.as_bytes());
        }
        Authority::DoubleMember {
            first_signer,
            co_signer,
            ..
        } => {
            buf.push(1); // auth kind: double member
            buf.extend_from_slice(first_signer.as_bytes());
            buf.extend_from_slice(co_signer.as_bytes());
        }
    }

    put_u64(&mut buf, msg.global_time);
    match msg.sequence_number {
        Some(seq) => {
            buf.push(1);
            put_u64(&mut buf, seq);
        }
        None => buf.push(0),
    }

    // destination_bytes: reserved, currently empty (destination is not
    // part of the content-addressed wire form; it is routing metadata
    // carried alongside the packet by the endpoint).
    put_u64(&mut buf, meta.batch.max_size as u64); // distribution_bytes placeholder retained for format stability

    put_u64(&mut buf, msg.payload.len() as u64);
    buf.extend_from_slice(&msg.payload);

    // Signature(s) occupy the packet's tail. For double-member messages
    // sigB (the co-signer's, at the earlier offset) precedes sigA (the
    // first signer's, trailing).
    match &msg.authority {
        Authority::Member { sig, .. } => {
            buf.extend_from_slice(&sig.0);
        }
        Authority::DoubleMember { sig_a, sig_b, .. } => {
            buf.extend_from_slice(&sig_b.0);
            buf.extend_from_slice(&sig_a.0);
        }
    }

    buf
}

/// The fields decoded from a packet before signature verification.
pub struct Decoded {
    pub community: Cid,
    pub meta_marker: u8,
    pub global_time: u64,
    pub sequence_number: Option<u64>,
    pub payload: Vec<u8>,
    pub authority: Authority,
    /// Offset at which the first signature begins; bytes before this
    /// offset are exactly what was signed.
    pub signed_region_end: usize,
}

/// Decode a packet's structure without verifying signatures. Returns
/// `CodecError` on any structural problem; the caller is responsible for
/// dropping the packet silently per spec §4.5 step 3/§7.
pub fn decode(expected_community: &Cid, sig_len: usize, bytes: &[u8]) -> Result<Decoded> {
    if bytes.len() < CID_LEN + 1 {
        return Err(CodecError::Truncated);
    }
    let community = Cid::from_bytes(&bytes[0..CID_LEN]);
    if &community != expected_community {
        return Err(CodecError::WrongCommunity);
    }
    let mut at = CID_LEN;
    let meta_marker = bytes[at];
    at += 1;

    let auth_kind = *bytes.get(at).ok_or(CodecError::Truncated)?;
    at += 1;
    let authority_and_sig_count = match auth_kind {
        0 => {
            let signer = Mid::from_bytes(bytes.get(at..at + MID_LEN).ok_or(CodecError::Truncated)?);
            at += MID_LEN;
            (RawAuthority::Member(signer), 1usize)
        }
        1 => {
            let first_signer =
                Mid::from_bytes(bytes.get(at..at + MID_LEN).ok_or(CodecError::Truncated)?);
            at += MID_LEN;
            let co_signer =
                Mid::from_bytes(bytes.get(at..at + MID_LEN).ok_or(CodecError::Truncated)?);
            at += MID_LEN;
            (RawAuthority::DoubleMember(first_signer, co_signer), 2usize)
        }
        other => return Err(CodecError::UnknownMeta(other)),
    };

    let global_time = get_u64(bytes, at)?;
    at += 8;

    let has_seq = *bytes.get(at).ok_or(CodecError::Truncated)?;
    at += 1;
    let sequence_number = if has_seq == 1 {
        let seq = get_u64(bytes, at)?;
        at += 8;
        Some(seq)
    } else {
        None
    };

    let _distribution_placeholder = get_u64(bytes, at)?;
    at += 8;

    let payload_len = get_u64(bytes, at)? as usize;
    at += 8;
    let payload = bytes
        .get(at..at + payload_len)
        .ok_or(CodecError::Truncated)?
        .to_vec();
    at += payload_len;

    let signed_region_end = at;
    let (sig_count, first_signer, co_signer) = match authority_and_sig_count.0 {
        RawAuthority::Member(signer) => (1, signer, None),
        RawAuthority::DoubleMember(first, co) => (2, first, Some(co)),
    };
    let tail = bytes.get(at..).ok_or(CodecError::Truncated)?;
    if tail.len() != sig_len * sig_count {
        return Err(CodecError::BadSignatureLength);
    }

    let authority = match co_signer {
        None => Authority::Member {
            signer: first_signer,
            sig: Sig(tail[0..sig_len].to_vec()),
        },
        Some(co_signer) => Authority::DoubleMember {
            first_signer,
            co_signer,
            sig_b: Sig(tail[0..sig_len].to_vec()),
            sig_a: Sig(tail[sig_len..sig_len * 2].to_vec()),
        },
    };

    Ok(Decoded {
        community,
        meta_marker,
        global_time,
        sequence_number,
        payload,
        authority,
        signed_region_end,
    })
}

enum RawAuthority {
    Member(Mid),
    DoubleMember(Mid, Mid),
}

/// Verify the signature(s) on a decoded-but-not-yet-trusted packet.
/// `signer_keys` resolves a `Mid` to the `PublicKey` needed to check its
/// signature (typically backed by the store's identity table).
pub fn verify_signatures(
    bytes: &[u8],
    decoded: &Decoded,
    authentication: &Authentication,
    resolve: impl Fn(Mid) -> Option<PublicKey>,
) -> bool {
    let signed_region = &bytes[..decoded.signed_region_end];
    match (&decoded.authority, authentication) {
        (Authority::Member { signer, sig }, Authentication::Member(_)) => {
            match resolve(*signer) {
                Some(pk) => crate::crypto::verify(&pk, signed_region, sig),
                None => false,
            }
        }
        (
            Authority::DoubleMember {
                first_signer,
                co_signer,
                sig_a,
                sig_b,
            },
            Authentication::DoubleMember(_),
        ) => {
            let first_ok = match resolve(*first_signer) {
                Some(pk) => crate::crypto::verify(&pk, signed_region, sig_a),
                None => false,
            };
            if !first_ok {
                return false;
            }
            if sig_b.is_zeroed() {
                // request-for-signature: co-signer has not signed yet.
                return true;
            }
            match resolve(*co_signer) {
                Some(pk) => crate::crypto::verify(&pk, signed_region, sig_b),
                None => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SecurityLevel};
    use crate::meta_message::{
        BatchConfiguration, Destination, Distribution, MetaMessage, Order, Resolution,
    };
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn meta(auth: Authentication) -> MetaMessage {
        MetaMessage::new(
            "test-message",
            auth,
            Resolution::Public,
            Distribution::FullSync {
                order: Order::InOrder,
                sequenced: false,
            },
            Destination::Community,
            BatchConfiguration::default(),
        )
    }

    #[test]
    fn encode_is_deterministic() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[7u8; 20]);
        let signer = kp.public_key().mid();
        let m = meta(Authentication::Member(SecurityLevel::Medium));
        let mut msg = Message {
            community,
            meta_name: m.name.clone(),
            global_time: 42,
            sequence_number: None,
            authority: Authority::Member {
                signer,
                sig: Sig(vec![0u8; SecurityLevel::Medium.signature_length()]),
            },
            payload: b"hello".to_vec(),
            raw: None,
            packet_id: None,
            undone: None,
        };
        let to_sign = encode(&msg, &m, 1);
        let sig = kp.sign(&to_sign[..to_sign.len() - SecurityLevel::Medium.signature_length()]);
        msg.authority = Authority::Member { signer, sig };

        let a = encode(&msg, &m, 1);
        let b = encode(&msg, &m, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn round_trips_member_message_and_verifies() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[1u8; 20]);
        let signer = kp.public_key().mid();
        let m = meta(Authentication::Member(SecurityLevel::Medium));
        let zero_sig = Sig(vec![0u8; SecurityLevel::Medium.signature_length()]);
        let unsigned = Message {
            community,
            meta_name: m.name.clone(),
            global_time: 7,
            sequence_number: None,
            authority: Authority::Member {
                signer,
                sig: zero_sig,
            },
            payload: b"some payload".to_vec(),
            raw: None,
            packet_id: None,
            undone: None,
        };
        let prefix = encode(&unsigned, &m, 3);
        let sig_len = SecurityLevel::Medium.signature_length();
        let signed_region = &prefix[..prefix.len() - sig_len];
        let sig = kp.sign(signed_region);
        let signed = Message {
            authority: Authority::Member { signer, sig },
            ..unsigned
        };
        let bytes = encode(&signed, &m, 3);

        let decoded = decode(&community, sig_len, &bytes).expect("decodes");
        assert_eq!(decoded.global_time, 7);
        assert_eq!(decoded.payload, b"some payload");

        let mut keys = HashMap::new();
        keys.insert(signer, kp.public_key());
        assert!(verify_signatures(&bytes, &decoded, &m.authentication, |mid| {
            keys.get(&mid).cloned()
        }));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[2u8; 20]);
        let signer = kp.public_key().mid();
        let m = meta(Authentication::Member(SecurityLevel::Medium));
        let sig_len = SecurityLevel::Medium.signature_length();
        let unsigned = Message {
            community,
            meta_name: m.name.clone(),
            global_time: 7,
            sequence_number: None,
            authority: Authority::Member {
                signer,
                sig: Sig(vec![0u8; sig_len]),
            },
            payload: b"original".to_vec(),
            raw: None,
            packet_id: None,
            undone: None,
        };
        let prefix = encode(&unsigned, &m, 3);
        let sig = kp.sign(&prefix[..prefix.len() - sig_len]);
        let signed = Message {
            authority: Authority::Member { signer, sig },
            ..unsigned
        };
        let mut bytes = encode(&signed, &m, 3);
        let payload_byte = bytes.len() - sig_len - 1;
        bytes[payload_byte] ^= 0xFF;

        let decoded = decode(&community, sig_len, &bytes).expect("structurally still decodes");
        let mut keys = HashMap::new();
        keys.insert(signer, kp.public_key());
        assert!(!verify_signatures(
            &bytes,
            &decoded,
            &m.authentication,
            |mid| keys.get(&mid).cloned()
        ));
    }

    #[test]
    fn request_for_signature_has_zeroed_sig_a() {
        let kp_a = KeyPair::generate(SecurityLevel::Medium);
        let kp_b = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[3u8; 20]);
        let m = meta(Authentication::DoubleMember(SecurityLevel::Medium));
        let sig_len = SecurityLevel::Medium.signature_length();

        let msg = Message {
            community,
            meta_name: m.name.clone(),
            global_time: 1,
            sequence_number: None,
            authority: Authority::DoubleMember {
                first_signer: kp_a.public_key().mid(),
                co_signer: kp_b.public_key().mid(),
                sig_a: kp_a.sign(b"placeholder-to-be-replaced"),
                sig_b: Sig::zeroed(SecurityLevel::Medium),
            },
            payload: b"co-signed content".to_vec(),
            raw: None,
            packet_id: None,
            undone: None,
        };
        let bytes = encode(&msg, &m, 5);
        let decoded = decode(&community, sig_len, &bytes).expect("decodes");
        assert!(decoded.authority.is_awaiting_co_signature());
    }

    proptest! {
        #[test]
        fn decode_recovers_whatever_was_encoded(global_time: u64, payload in proptest::collection::vec(any::<u8>(), 0..64)) {
            let kp = KeyPair::generate(SecurityLevel::Medium);
            let community = Cid::from_bytes(&[9u8; 20]);
            let signer = kp.public_key().mid();
            let m = meta(Authentication::Member(SecurityLevel::Medium));
            let sig_len = SecurityLevel::Medium.signature_length();
            let unsigned = Message {
                community,
                meta_name: m.name.clone(),
                global_time,
                sequence_number: None,
                authority: Authority::Member { signer, sig: Sig(vec![0u8; sig_len]) },
                payload: payload.clone(),
                raw: None,
                packet_id: None,
                undone: None,
            };
            let prefix = encode(&unsigned, &m, 2);
            let sig = kp.sign(&prefix[..prefix.len() - sig_len]);
            let signed = Message { authority: Authority::Member { signer, sig }, ..unsigned };
            let bytes = encode(&signed, &m, 2);

            let decoded = decode(&community, sig_len, &bytes).expect("decodes");
            prop_assert_eq!(decoded.global_time, global_time);
            prop_assert_eq!(decoded.payload, payload);
        }
    }
}
