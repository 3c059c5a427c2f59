//! Member identity (design doc component 4.1 / data model §3).
//!
//! A `Member` is created on first identity observation and persists for
//! the community's life. It is identified by its `Mid` (a 20-byte hash
//! of the public key) and carries mutable tags (`ignore`, `blacklist`).

use crate::crypto::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 20-byte member identifier: a hash of the member's public key.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Mid([u8; 20]);

impl Mid {
    /// Derive a `Mid` from raw public-key bytes.
    pub fn from_public_key_bytes(bytes: &[u8]) -> Self {
        Mid(crate::crypto::hash20(bytes))
    }

    /// Raw bytes of this identifier.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Rebuild a `Mid` from an exactly-20-byte slice (as produced by the
    /// wire codec, which has already bounds-checked the slice).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(bytes);
        Mid(out)
    }
}

impl fmt::Debug for Mid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mid(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// A tag attached to a member, affecting how the local peer treats
/// traffic authored by them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Tag {
    /// Hide this member's messages from the application without
    /// affecting storage (soft, local-only).
    Ignore,
    /// Stop storing this member's messages entirely and purge existing
    /// ones; applied after malicious behaviour is detected (spec §4.8).
    Blacklist,
}

/// A keyed identity within a community.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Member {
    public_key: PublicKey,
    mid: Mid,
    tags: BTreeSet<Tag>,
}

impl Member {
    /// Create a member from an observed public key.
    pub fn new(public_key: PublicKey) -> Self {
        let mid = public_key.mid();
        Self {
            public_key,
            mid,
            tags: BTreeSet::new(),
        }
    }

    /// This member's identifier.
    pub fn mid(&self) -> Mid {
        self.mid
    }

    /// This member's public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Whether `tag` is set.
    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tags.contains(&tag)
    }

    /// Set `tag` on this member.
    pub fn add_tag(&mut self, tag: Tag) {
        let _ = self.tags.insert(tag);
    }

    /// Clear `tag` from this member.
    pub fn remove_tag(&mut self, tag: Tag) {
        let _ = self.tags.remove(&tag);
    }

    /// Whether this member is blacklisted (spec §4.8 double-undo rule).
    pub fn is_blacklisted(&self) -> bool {
        self.has_tag(Tag::Blacklist)
    }
}
