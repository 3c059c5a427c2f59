//! Crate-wide error type.
//!
//! Mirrors the error-kind list in the design document's error handling
//! section: each kind carries just enough context to decide the policy
//! response (drop, delay, blacklist, ...) without the caller needing to
//! downcast.

use crate::member::Mid;
use std::result;

/// A specialised `Result` type for this crate.
pub type Result<T> = result::Result<T, Error>;

/// Core error type. Submodules with narrower concerns (the codec, the
/// store) define their own `thiserror` enum and convert into this one
/// at the boundary.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Signature verification failed for an incoming packet.
    #[error("invalid signature")]
    InvalidSignature,

    /// A `dispersy-identity` packet's public key is not a valid point
    /// for its declared security level.
    #[error("invalid identity for member {0:?}")]
    InvalidIdentity(Mid),

    /// The store already holds a row for this uniqueness key.
    #[error("duplicate message")]
    Duplicate,

    /// A last-N message arrived older than the currently-kept minimum.
    #[error("older than the current last-N window")]
    OlderThanLastN,

    /// A sequence-numbered message arrived with a sequence number that
    /// leaves a gap before `expected_next`.
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap {
        /// Next sequence number this peer expects.
        expected: u64,
        /// Sequence number actually carried by the packet.
        got: u64,
    },

    /// A sequence-numbered message repeats a stored sequence number at
    /// an equal or later global time.
    #[error("sequence conflict at seq {0}")]
    SequenceConflict(u64),

    /// The message cannot be checked yet because an authorize proof is
    /// missing; the caller should request it and retry on arrival.
    #[error("delayed pending proof for member {0:?}")]
    DelayByProof(Mid),

    /// The message cannot be applied yet because a prerequisite message
    /// is missing from the store (e.g. an undo target).
    #[error("delayed pending missing message")]
    DelayByMissingMessage,

    /// The timeline denies this action outright (no proof chase will
    /// help: the resolution policy in force forbids it).
    #[error("permission denied for member {0:?}")]
    PermissionDenied(Mid),

    /// The packet's byte layout doesn't parse.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// The community has received `dispersy-destroy-community` with
    /// `hard_kill = true` and no longer accepts new messages.
    #[error("community destroyed")]
    CommunityDestroyed,

    /// The member has been caught in malicious behaviour (double-undo)
    /// and is blacklisted; its rows have been purged.
    #[error("member {0:?} is blacklisted")]
    MaliciousMember(Mid),

    /// A locally-issued request (double-sign, introduction, missing-*)
    /// timed out without a matching response.
    #[error("request timed out")]
    Timeout,

    /// The requested row does not exist in the store.
    #[error("no such message")]
    NotFound,

    /// Backing store failure (I/O, corruption).
    #[error("store error: {0}")]
    Store(String),

    /// `bincode` (de)serialisation failure.
    #[error("serialisation error: {0}")]
    Serialisation(String),
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialisation(err.to_string())
    }
}
