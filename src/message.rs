//! Message: an instance of a meta-message (data model §3).

use crate::community::Cid;
use crate::crypto::Sig;
use crate::member::Mid;
use custom_debug::Debug as CustomDebug;
use serde::{Deserialize, Serialize};

/// Store row identifier, assigned on insertion.
pub type PacketId = u64;

/// The authenticating signature(s) carried by a message.
#[derive(Clone, CustomDebug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Authority {
    /// Single-member authentication: one signer, one signature.
    Member { signer: Mid, sig: Sig },
    /// Double-member authentication. `first_signer` is whoever produced
    /// `sig_a` (the trailing signature on the wire); `co_signer`
    /// produced `sig_b`. `sig_b` is all-zero until the co-signer
    /// responds to a request-for-signature (spec §4.2).
    DoubleMember {
        first_signer: Mid,
        co_signer: Mid,
        sig_a: Sig,
        sig_b: Sig,
    },
}

impl Authority {
    /// The member whose (community, member, global_time) triplet keys
    /// this message's uniqueness constraint for single-member kinds.
    pub fn first_signer(&self) -> Mid {
        match self {
            Authority::Member { signer, .. } => *signer,
            Authority::DoubleMember { first_signer, .. } => *first_signer,
        }
    }

    /// Ordered pair of signers, used as the last-N key for
    /// double-member-keyed distribution.
    pub fn member_combination(&self) -> Option<(Mid, Mid)> {
        match self {
            Authority::Member { .. } => None,
            Authority::DoubleMember {
                first_signer,
                co_signer,
                ..
            } => Some(order_pair(*first_signer, *co_signer)),
        }
    }

    /// Whether the co-signer's slot still holds the all-zero placeholder
    /// (spec §4.2: "a request-for-signature has sigA = 0...0 until the
    /// co-signer responds" — mirrored here for sigB on our side of a
    /// double-member message awaiting counter-signature).
    pub fn is_awaiting_co_signature(&self) -> bool {
        match self {
            Authority::Member { .. } => false,
            Authority::DoubleMember { sig_b, .. } => sig_b.is_zeroed(),
        }
    }
}

fn order_pair(a: Mid, b: Mid) -> (Mid, Mid) {
    if a.as_bytes() <= b.as_bytes() {
        (a, b)
    } else {
        (b, a)
    }
}

/// An instance of a meta-message: the `(community, member, global_time)`
/// triplet, payload, signature(s), and bookkeeping the store attaches
/// once persisted.
#[derive(Clone, CustomDebug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub community: Cid,
    pub meta_name: String,
    pub global_time: u64,
    /// Present only for sequenced distribution.
    pub sequence_number: Option<u64>,
    pub authority: Authority,
    #[debug(skip)]
    pub payload: Vec<u8>,
    /// Raw wire bytes, set once the message has been encoded or decoded;
    /// used for the batch layer's byte-identical collapse (spec §4.5).
    #[debug(skip)]
    pub raw: Option<Vec<u8>>,
    /// Row id once stored.
    pub packet_id: Option<PacketId>,
    /// Row id of the message that undid this one, if any (`undone` flag,
    /// spec §3 store invariants).
    pub undone: Option<PacketId>,
}

impl Message {
    /// The member whose identity keys this message's store uniqueness.
    pub fn first_signer(&self) -> Mid {
        self.authority.first_signer()
    }

    /// Whether this message is currently marked undone.
    pub fn is_undone(&self) -> bool {
        self.undone.is_some()
    }
}
