//! Store (design doc component 4.3): durable state backing one
//! `Context`. Defines the `Store` trait; `memory::MemoryStore` is the
//! in-process implementation used by tests and `sled_store::SledStore`
//! the persistent one used by the launcher binary.

pub mod memory;
pub mod sled_store;

use crate::community::Cid;
use crate::crypto::PublicKey;
use crate::error::Result;
use crate::member::{Member, Mid};
use crate::message::{Message, PacketId};

/// The key a last-N window is pruned by: either a single author or an
/// ordered pair of co-signers (spec §4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LastNKey {
    Single(Mid),
    Combination(Mid, Mid),
}

impl LastNKey {
    pub fn of(msg: &Message) -> Self {
        match msg.authority.member_combination() {
            Some((a, b)) => LastNKey::Combination(a, b),
            None => LastNKey::Single(msg.first_signer()),
        }
    }
}

/// Durable state for one community: identities, messages, and the
/// bookkeeping (sequence numbers, undone markers) the distribution
/// policies and undo engine need. All mutating operations here are the
/// atomic unit the batch pipeline assumes (spec §4.5 step 4: "insertion
/// plus any pruning/cascade it requires happen as one atomic store
/// operation").
pub trait Store {
    /// Record (or update) a member's observed public key and tags.
    fn put_member(&mut self, member: &Member) -> Result<()>;

    /// Look up a member by `mid`.
    fn member(&self, mid: Mid) -> Option<Member>;

    /// Resolve a `mid` straight to its public key, the minimal
    /// information the codec's `verify_signatures` needs.
    fn resolve_public_key(&self, mid: Mid) -> Option<PublicKey> {
        self.member(mid).map(|m| m.public_key().clone())
    }

    /// Insert a newly-accepted message, assigning it a `packet_id`.
    ///
    /// Returns `Error::Duplicate` if a row already exists for this
    /// message's uniqueness key `(community, meta_name, author-key,
    /// global_time)` (spec §4.3 "Uniqueness"). Distribution-policy
    /// pruning (last-N eviction) is the caller's responsibility, invoked
    /// after a successful insert so it can name the new row's id.
    fn insert(&mut self, community: &Cid, msg: Message) -> Result<Message>;

    /// Fetch the row at this single-member uniqueness key, if any.
    fn fetch_by_signer(
        &self,
        community: &Cid,
        meta_name: &str,
        signer: Mid,
        global_time: u64,
    ) -> Option<Message>;

    /// Fetch the row at this double-member uniqueness key, if any.
    fn fetch_by_combination(
        &self,
        community: &Cid,
        meta_name: &str,
        combination: (Mid, Mid),
        global_time: u64,
    ) -> Option<Message>;

    /// Look a row up by its assigned id.
    fn by_packet_id(&self, packet_id: PacketId) -> Option<Message>;

    /// All rows for `(community, meta_name)`, ascending global time.
    fn range(&self, community: &Cid, meta_name: &str) -> Vec<Message>;

    /// All rows for `(community, meta_name, key)` (one author or
    /// co-signer pair), ascending global time — the window a `LastN`
    /// policy prunes against.
    fn window(&self, community: &Cid, meta_name: &str, key: LastNKey) -> Vec<Message>;

    /// The highest sequence number stored for `(community, meta_name,
    /// signer)`, if any (spec §4.6 "Sequence-numbered").
    fn highest_sequence(&self, community: &Cid, meta_name: &str, signer: Mid) -> Option<u64>;

    /// Evict the row `packet_id` entirely (last-N pruning).
    fn evict(&mut self, packet_id: PacketId) -> Result<()>;

    /// Mark `target` as undone by `undoer`.
    fn mark_undone(&mut self, target: PacketId, undoer: PacketId) -> Result<()>;

    /// Clear a previously-applied undo marker (dynamic-settings redo,
    /// spec §4.8).
    fn clear_undone(&mut self, target: PacketId) -> Result<()>;

    /// Purge every row authored (as first signer) by `member` within
    /// `community` — the double-undo blacklist response (spec §4.8).
    fn delete_where(&mut self, community: &Cid, member: Mid) -> Result<usize>;

    /// Retain `packets` as malicious proof for `member` in `community`,
    /// independent of `delete_where`'s purge of that member's other rows
    /// (spec §4.8, §6 `malicious_proof(community, member, packet)`): the
    /// two conflicting `dispersy-undo-own` packets survive the blacklist
    /// purge so they can be forwarded to any peer that later propagates
    /// a message by that author.
    fn put_malicious_proof(&mut self, community: &Cid, member: Mid, packets: Vec<Message>) -> Result<()>;

    /// Every malicious-proof packet retained for `member` in `community`.
    fn malicious_proofs(&self, community: &Cid, member: Mid) -> Vec<Message>;
}
