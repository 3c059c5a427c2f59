//! Community (data model §3) and the per-peer `Context` that replaces
//! the original implementation's process-wide singletons (`Dispersy`,
//! `DispersyDatabase`) with an explicit, constructed-once object, per the
//! design notes (§9 "Global singletons").

use crate::batch::Batcher;
use crate::crypto::{KeyPair, Sig};
use crate::error::{Error, Result};
use crate::member::{Member, Mid};
use crate::message::{Authority, Message};
use crate::meta_message::MetaMessage;
use crate::store::Store;
use crate::sync::request_cache::{Identifier, RequestCache};
use crate::sync::{MissingProofRequest, MissingSequenceRequest, PendingRequest};
use crate::timeline::{Action, Timeline};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long an outbound missing-proof/missing-sequence request waits
/// for a reply before `Context::expire_requests` releases it (spec §5).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub mod demo;

/// A community identifier: the `mid` of its master member.
pub type Cid = Mid;

/// The per-community state a single peer holds: its own signing
/// identity, the monotone `global_time` counter, classification, and
/// the permission `Timeline`.
pub struct Community {
    pub cid: Cid,
    pub my_member: Member,
    global_time: u64,
    classification: String,
    pub auto_load: bool,
    pub timeline: Timeline,
    meta_messages: HashMap<String, MetaMessage>,
    pub(crate) batcher: Batcher,
    destroyed: bool,
}

impl Community {
    /// Create a community rooted at `master_mid`, with `my_member` as
    /// this peer's local signing identity.
    pub fn new(master_mid: Cid, my_member: Member, classification: impl Into<String>) -> Self {
        Self {
            cid: master_mid,
            timeline: Timeline::new(master_mid),
            my_member,
            global_time: 0,
            classification: classification.into(),
            auto_load: true,
            meta_messages: HashMap::new(),
            batcher: Batcher::new(),
            destroyed: false,
        }
    }

    /// Register a meta-message in this community's catalogue, assigning
    /// it a stable wire marker.
    pub fn register_meta_message(&mut self, meta: MetaMessage) {
        let _ = self.batcher.register(&meta.name);
        let _ = self.meta_messages.insert(meta.name.clone(), meta);
    }

    /// The wire marker assigned to `name`, if it has been registered.
    pub fn meta_marker(&self, name: &str) -> Option<u8> {
        self.batcher.name_to_marker(name)
    }

    /// Look up a meta-message by name.
    pub fn meta_message(&self, name: &str) -> Option<&MetaMessage> {
        self.meta_messages.get(name)
    }

    /// All registered meta-messages.
    pub fn meta_messages(&self) -> impl Iterator<Item = &MetaMessage> {
        self.meta_messages.values()
    }

    /// Current classification (mutable via `reclassify`).
    pub fn classification(&self) -> &str {
        &self.classification
    }

    /// Change this community's classification, e.g. on protocol upgrade.
    pub fn reclassify(&mut self, classification: impl Into<String>) {
        self.classification = classification.into();
    }

    /// This community's monotone global-time counter.
    pub fn global_time(&self) -> u64 {
        self.global_time
    }

    /// Advance `global_time` to at least `candidate`, as every
    /// distribution policy does on message acceptance (spec §4.6).
    pub fn observe_global_time(&mut self, candidate: u64) {
        if candidate > self.global_time {
            self.global_time = candidate;
        }
    }

    /// Allocate the next global time for a locally-authored message.
    pub fn next_global_time(&mut self) -> u64 {
        self.global_time += 1;
        self.global_time
    }

    /// Whether this community has received a hard-kill
    /// `dispersy-destroy-community` (spec §7, §8 scenario 6).
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Apply a hard-kill: stop accepting new messages, keep existing
    /// state for proof-serving.
    pub fn destroy(&mut self) {
        self.destroyed = true;
    }

    /// Guard used at the top of every inbound/outbound entry point.
    pub fn check_not_destroyed(&self) -> Result<()> {
        if self.destroyed {
            Err(Error::CommunityDestroyed)
        } else {
            Ok(())
        }
    }
}

/// Per-peer context: the explicit replacement for the original
/// implementation's singletons. Owns one `Community` plus the `Store`
/// backing all of them, and drives the inbound/outbound pipeline
/// described in design doc §2 ("Data flows").
pub struct Context<S: Store> {
    pub store: S,
    pub community: Community,
    /// When set, an incoming packet for an unregistered meta-message
    /// marker is a hard error instead of a silently dropped packet
    /// (`--strict`, spec §6).
    pub strict: bool,
    /// Outbound missing-proof/missing-sequence requests awaiting a
    /// reply (spec §5).
    requests: RequestCache<PendingRequest>,
}

impl<S: Store> Context<S> {
    /// Construct a context for a single community over the given store.
    pub fn new(store: S, community: Community) -> Self {
        Self {
            store,
            community,
            strict: false,
            requests: RequestCache::new(),
        }
    }

    /// Turns on strict handling of unregistered meta-message markers.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// A snapshot of every registered meta-message, keyed by name, for
    /// `batch::flush` to resolve an undo target's meta-message without
    /// holding a borrow of `self.community` across the call (edition
    /// 2018 has no disjoint closure captures).
    fn catalog(&self) -> HashMap<String, MetaMessage> {
        self.community.meta_messages().map(|m| (m.name.clone(), m.clone())).collect()
    }

    /// Endpoint → Batch → Codec → Dedup → Timeline → Policy → Store →
    /// Handlers, for a set of raw packets received together (spec §2).
    ///
    /// Packets are first grouped into the pending batch for their
    /// meta-message (by marker byte, resolved via `meta_lookup`); when a
    /// batch flushes, `crate::batch::flush` performs the full
    /// dedup → verify → timeline-check → policy pipeline and this method
    /// installs the accepted rows into `store`, invoking `on_accept` for
    /// each and `on_defer` for anything delayed pending proof or a
    /// missing message.
    pub fn on_incoming_packets(
        &mut self,
        packets: Vec<(u8, Vec<u8>)>,
        mut on_accept: impl FnMut(&Message),
        mut on_defer: impl FnMut(Mid, crate::batch::DeferReason),
        mut on_correction: impl FnMut(Mid, Message),
    ) -> Result<()> {
        self.community.check_not_destroyed()?;
        let catalog = self.catalog();

        let mut by_marker: HashMap<u8, Vec<Vec<u8>>> = HashMap::new();
        for (marker, bytes) in packets {
            by_marker.entry(marker).or_default().push(bytes);
        }

        for (marker, raws) in by_marker {
            let meta_name = match self.community.batcher.marker_to_name(marker) {
                Some(name) => name,
                None => {
                    if self.strict {
                        return Err(Error::MalformedPacket(format!("unregistered meta-message marker {}", marker)));
                    }
                    warn!(marker, "dropping packets for unknown meta-message marker");
                    continue;
                }
            };
            let meta = match self.community.meta_message(&meta_name) {
                Some(m) => m.clone(),
                None => {
                    if self.strict {
                        return Err(Error::MalformedPacket(format!("unregistered meta-message {:?}", meta_name)));
                    }
                    continue;
                }
            };

            let outcome = crate::batch::flush(
                &mut self.store,
                &mut self.community.timeline,
                &self.community.cid,
                &meta,
                raws,
                &catalog,
            )?;

            for accepted in outcome.accepted {
                self.community.observe_global_time(accepted.global_time);
                debug!(meta = %meta.name, gt = accepted.global_time, "message accepted");
                on_accept(&accepted);
            }
            let now = Instant::now();
            for (mid, reason) in outcome.deferred {
                match &reason {
                    crate::batch::DeferReason::MissingProof { meta_name, global_time } => {
                        let request = PendingRequest::MissingProof(MissingProofRequest {
                            meta_name: meta_name.clone(),
                            member: mid,
                            global_time: *global_time,
                        });
                        let _ = self.requests.claim(request, REQUEST_TIMEOUT, now);
                    }
                    crate::batch::DeferReason::MissingSequence { expected_sequence } => {
                        let request = PendingRequest::MissingSequence(MissingSequenceRequest {
                            meta_name: meta.name.clone(),
                            member: mid,
                            low: *expected_sequence,
                            high: *expected_sequence,
                        });
                        let _ = self.requests.claim(request, REQUEST_TIMEOUT, now);
                    }
                    // A missing-message defer carries no target global
                    // time or meta-message name to rebuild a request
                    // from, so it isn't tracked here.
                    crate::batch::DeferReason::MissingMessage => {}
                }
                on_defer(mid, reason);
            }
            for (offender, newest) in outcome.corrections {
                on_correction(offender, newest);
            }
        }

        Ok(())
    }

    /// Release every outstanding missing-proof/missing-sequence request
    /// whose deadline has passed as of `now`, for the caller to retry or
    /// give up on (spec §5).
    pub fn expire_requests(&mut self, now: Instant) -> Vec<(Identifier, PendingRequest)> {
        self.requests.expire(now)
    }

    /// Resolve an outstanding request by the identifier embedded in its
    /// outbound packet, once a matching reply has arrived. Returns
    /// `None` if the request already expired or was never claimed.
    pub fn resolve_request(&mut self, id: Identifier) -> Option<PendingRequest> {
        self.requests.pop(id)
    }

    /// Author, sign, and locally admit a new single-member message of
    /// kind `meta_name` (spec §4.2 "outbound"). The signed packet is run
    /// through the same `batch::flush` pipeline inbound packets take, so
    /// a locally-authored message that the timeline would reject (e.g.
    /// this peer has lost its permit) fails exactly as it would on
    /// another peer. Only `Authentication::Member` kinds are supported;
    /// double-member messages need a request-for-signature exchange this
    /// helper doesn't perform.
    pub fn create_message(
        &mut self,
        keypair: &KeyPair,
        meta_name: &str,
        payload: Vec<u8>,
    ) -> Result<Message> {
        self.community.check_not_destroyed()?;
        let meta = self
            .community
            .meta_message(meta_name)
            .cloned()
            .ok_or_else(|| Error::MalformedPacket(format!("unregistered meta-message {:?}", meta_name)))?;
        let marker = self
            .community
            .meta_marker(meta_name)
            .ok_or_else(|| Error::MalformedPacket(format!("unregistered meta-message {:?}", meta_name)))?;

        let signer = self.community.my_member.mid();
        let global_time = self.community.next_global_time();
        let sequence_number = if meta.is_sequenced() {
            Some(
                self.store
                    .highest_sequence(&self.community.cid, &meta.name, signer)
                    .map(|seq| seq + 1)
                    .unwrap_or(1),
            )
        } else {
            None
        };

        let unsigned = Message {
            community: self.community.cid,
            meta_name: meta.name.clone(),
            global_time,
            sequence_number,
            authority: Authority::Member {
                signer,
                sig: Sig::zeroed(keypair.security_level()),
            },
            payload,
            raw: None,
            packet_id: None,
            undone: None,
        };
        let sig_len = keypair.security_level().signature_length();
        let prefix = crate::codec::encode(&unsigned, &meta, marker);
        let sig = keypair.sign(&prefix[..prefix.len() - sig_len]);
        let signed = Message {
            authority: Authority::Member { signer, sig },
            ..unsigned
        };
        let raw = crate::codec::encode(&signed, &meta, marker);

        let catalog = self.catalog();
        let outcome = crate::batch::flush(
            &mut self.store,
            &mut self.community.timeline,
            &self.community.cid,
            &meta,
            vec![raw],
            &catalog,
        )?;
        match outcome.accepted.into_iter().next() {
            Some(accepted) => {
                self.community.observe_global_time(accepted.global_time);
                Ok(accepted)
            }
            None => Err(Error::PermissionDenied(signer)),
        }
    }

    /// `dispersy-authorize`: grant `grants` (spec §4.4).
    pub fn create_authorize(
        &mut self,
        keypair: &KeyPair,
        grants: Vec<(Mid, String, Action)>,
    ) -> Result<Message> {
        let payload = crate::permission::AuthorizePayload { grants };
        let bytes = bincode::serialize(&payload)?;
        self.create_message(keypair, crate::permission::AUTHORIZE, bytes)
    }

    /// `dispersy-revoke`: revoke `revokes` (spec §4.4).
    pub fn create_revoke(
        &mut self,
        keypair: &KeyPair,
        revokes: Vec<(Mid, String, Action)>,
    ) -> Result<Message> {
        let payload = crate::permission::RevokePayload { revokes };
        let bytes = bincode::serialize(&payload)?;
        self.create_message(keypair, crate::permission::REVOKE, bytes)
    }

    /// `dispersy-dynamic-settings`: change `target_meta_name`'s effective
    /// resolution policy from `global_time` on (spec §4.8).
    pub fn create_dynamic_settings(
        &mut self,
        keypair: &KeyPair,
        target_meta_name: String,
        resolution: crate::meta_message::Resolution,
    ) -> Result<Message> {
        let payload = crate::permission::DynamicSettingsPayload {
            meta_name: target_meta_name,
            resolution,
        };
        let bytes = bincode::serialize(&payload)?;
        self.create_message(keypair, crate::permission::DYNAMIC_SETTINGS, bytes)
    }

    /// `dispersy-undo-own`: mark one of this peer's own prior messages
    /// undone. Re-issuing for an already-undone target returns the
    /// existing undo message rather than authoring a second one (spec
    /// §4.8).
    pub fn create_undo_own(
        &mut self,
        keypair: &KeyPair,
        target_meta_name: String,
        target_global_time: u64,
    ) -> Result<Message> {
        let signer = self.community.my_member.mid();
        if let Some(existing) = self.existing_undo_of(&target_meta_name, signer, target_global_time) {
            return Ok(existing);
        }
        let payload = crate::undo::UndoOwnPayload {
            target_meta_name,
            target_global_time,
        };
        let bytes = bincode::serialize(&payload)?;
        self.create_message(keypair, crate::undo::UNDO_OWN, bytes)
    }

    /// `dispersy-undo-other`: mark a third party's message undone,
    /// requiring this peer to hold `Action::Undo` for that kind (spec
    /// §4.8).
    pub fn create_undo_other(
        &mut self,
        keypair: &KeyPair,
        target_member: Mid,
        target_meta_name: String,
        target_global_time: u64,
    ) -> Result<Message> {
        if let Some(existing) = self.existing_undo_of(&target_meta_name, target_member, target_global_time) {
            return Ok(existing);
        }
        let payload = crate::undo::UndoOtherPayload {
            target_member,
            target_meta_name,
            target_global_time,
        };
        let bytes = bincode::serialize(&payload)?;
        self.create_message(keypair, crate::undo::UNDO_OTHER, bytes)
    }

    fn existing_undo_of(&self, meta_name: &str, signer: Mid, global_time: u64) -> Option<Message> {
        let target = self.store.fetch_by_signer(&self.community.cid, meta_name, signer, global_time)?;
        let undo_id = target.undone?;
        self.store.by_packet_id(undo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SecurityLevel};

    #[test]
    fn global_time_only_advances() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let member = Member::new(kp.public_key());
        let mut community = Community::new(member.mid(), member, "test");
        community.observe_global_time(5);
        assert_eq!(community.global_time(), 5);
        community.observe_global_time(3);
        assert_eq!(community.global_time(), 5);
        community.observe_global_time(9);
        assert_eq!(community.global_time(), 9);
    }

    #[test]
    fn destroyed_community_rejects_checks() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let member = Member::new(kp.public_key());
        let mut community = Community::new(member.mid(), member, "test");
        assert!(community.check_not_destroyed().is_ok());
        community.destroy();
        assert_matches::assert_matches!(community.check_not_destroyed(), Err(Error::CommunityDestroyed));
    }

    #[test]
    fn master_can_author_and_undo_its_own_text_message() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let master = Member::new(kp.public_key());
        let community = demo::build(master.mid(), master);
        let mut ctx = Context::new(crate::store::memory::MemoryStore::new(), community);
        ctx.store.put_member(&ctx.community.my_member.clone()).unwrap();

        let text = ctx.create_message(&kp, "text", b"hello world".to_vec()).expect("master may author");
        assert_eq!(text.payload, b"hello world");
        let gt = text.global_time;

        let undo = ctx
            .create_undo_own(&kp, "text".to_string(), gt)
            .expect("master may undo its own message");
        let target = ctx.store.by_packet_id(text.packet_id.unwrap()).unwrap();
        assert_eq!(target.undone, undo.packet_id);

        let again = ctx
            .create_undo_own(&kp, "text".to_string(), gt)
            .expect("re-issuing returns the existing undo");
        assert_eq!(again.packet_id, undo.packet_id);
    }

    #[test]
    fn unregistered_meta_message_is_rejected() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let master = Member::new(kp.public_key());
        let community = Community::new(master.mid(), master, "test");
        let mut ctx = Context::new(crate::store::memory::MemoryStore::new(), community);
        assert!(ctx.create_message(&kp, "no-such-kind", vec![]).is_err());
    }
}
