//! Batch (design doc component 4.5): per-meta-message marker
//! registration plus the four-step pipeline a flushed batch goes
//! through — byte-identical collapse, pre-verification duplicate-key
//! drop, signature verification, and timeline admission — before
//! handing surviving messages to the distribution policy for storage.

use crate::codec;
use crate::community::Cid;
use crate::error::Result;
use crate::member::Mid;
use crate::message::{Authority, Message, PacketId};
use crate::meta_message::{Authentication, Distribution, MetaMessage, Order, Resolution};
use crate::permission;
use crate::store::{LastNKey, Store};
use crate::timeline::{Action, CheckOutcome, Timeline};
use crate::undo::{self, UndoApplied, UndoCheck};
use std::collections::{HashMap, HashSet};
use tracing::{trace, warn};

/// Assigns and remembers the single-byte marker identifying each
/// meta-message on the wire, within one community (spec §4.2
/// `meta_marker`).
#[derive(Default)]
pub struct Batcher {
    marker_to_name: HashMap<u8, String>,
    name_to_marker: HashMap<String, u8>,
    next_marker: u16,
}

impl Batcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign (or return the existing) marker for `name`. Markers are
    /// assigned in registration order and stable for the community's
    /// life; registering more than 256 meta-messages is a configuration
    /// error the caller should catch at startup.
    pub fn register(&mut self, name: &str) -> u8 {
        if let Some(&marker) = self.name_to_marker.get(name) {
            return marker;
        }
        let marker = self.next_marker as u8;
        self.next_marker += 1;
        let _ = self.marker_to_name.insert(marker, name.to_string());
        let _ = self.name_to_marker.insert(name.to_string(), marker);
        marker
    }

    pub fn marker_to_name(&self, marker: u8) -> Option<String> {
        self.marker_to_name.get(&marker).cloned()
    }

    pub fn name_to_marker(&self, name: &str) -> Option<u8> {
        self.name_to_marker.get(name).copied()
    }
}

/// Why a message could not be accepted outright but wasn't permanently
/// dropped either.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeferReason {
    /// The timeline has no record of this member holding the required
    /// action; a `dispersy-missing-proof` request should be sent and
    /// the message retried once the proof arrives.
    MissingProof { meta_name: String, global_time: u64 },
    /// A sequence-numbered message arrived ahead of an expected earlier
    /// one; a `dispersy-missing-sequence` request should be sent.
    MissingSequence { expected_sequence: u64 },
    /// An undo message's target has not been seen yet; a
    /// `dispersy-missing-message` request should be sent.
    MissingMessage,
}

/// The result of flushing one batch.
#[derive(Default)]
pub struct FlushOutcome {
    pub accepted: Vec<Message>,
    pub deferred: Vec<(Mid, DeferReason)>,
    /// `LastN` packets that arrived older than the currently-kept window:
    /// the offender and the newest row they should be corrected with
    /// (spec §4.6).
    pub corrections: Vec<(Mid, Message)>,
}

/// Run the full admission pipeline for one flushed batch of raw packets
/// belonging to a single meta-message, returning every message accepted
/// into `store` plus anything deferred pending proof or an earlier
/// sequence member. `catalog` resolves a meta-message by name, used to
/// reach an undo message's target meta-message's undo callback.
pub fn flush<S: Store>(
    store: &mut S,
    timeline: &mut Timeline,
    community: &Cid,
    meta: &MetaMessage,
    raws: Vec<Vec<u8>>,
    catalog: &HashMap<String, MetaMessage>,
) -> Result<FlushOutcome> {
    let mut outcome = FlushOutcome::default();

    // Step 1: byte-identical collapse (spec §4.5 step 1).
    let mut seen = HashSet::new();
    let unique: Vec<Vec<u8>> = raws.into_iter().filter(|raw| seen.insert(raw.clone())).collect();

    let sig_len = match meta.authentication {
        Authentication::Member(level) | Authentication::DoubleMember(level) => level.signature_length(),
    };

    for raw in unique {
        let decoded = match codec::decode(community, sig_len, &raw) {
            Ok(d) => d,
            Err(err) => {
                trace!(meta = %meta.name, %err, "dropping malformed packet");
                continue;
            }
        };

        let first_signer = decoded.authority.first_signer();

        // A blacklisted member's packets are dropped outright, before any
        // further processing (spec §4.8, member.rs `Tag::Blacklist`).
        if store.member(first_signer).map(|m| m.is_blacklisted()).unwrap_or(false) {
            trace!(meta = %meta.name, signer = ?first_signer, "dropping packet from a blacklisted member");
            continue;
        }

        // Step 2: pre-verification duplicate-key drop (spec §4.5 step 2).
        let already_stored = match decoded.authority.member_combination() {
            Some(combo) => store
                .fetch_by_combination(community, &meta.name, combo, decoded.global_time)
                .is_some(),
            None => store
                .fetch_by_signer(community, &meta.name, first_signer, decoded.global_time)
                .is_some(),
        };
        if already_stored {
            trace!(meta = %meta.name, gt = decoded.global_time, "dropping already-stored duplicate");
            continue;
        }

        // Step 3: signature verification (spec §4.5 step 3).
        let verified = codec::verify_signatures(&raw, &decoded, &meta.authentication, |mid| {
            store.resolve_public_key(mid)
        });
        if !verified {
            warn!(meta = %meta.name, signer = ?first_signer, "signature verification failed");
            continue;
        }

        // Step 4: timeline admission (spec §4.5 step 4, §4.4).
        let resolution = timeline.get_resolution_policy(&meta.name, decoded.global_time, &meta.resolution);
        let check = match effective_resolution(&resolution) {
            Resolution::Public => CheckOutcome::Accept,
            _ => timeline.check_action(first_signer, &meta.name, Action::Permit, decoded.global_time),
        };
        match check {
            CheckOutcome::Drop(reason) => {
                trace!(meta = %meta.name, signer = ?first_signer, reason, "timeline denied message");
                continue;
            }
            CheckOutcome::DelayByProof => {
                outcome.deferred.push((
                    first_signer,
                    DeferReason::MissingProof {
                        meta_name: meta.name.clone(),
                        global_time: decoded.global_time,
                    },
                ));
                continue;
            }
            CheckOutcome::Accept => {}
        }

        // System meta-messages additionally require the signer to hold
        // the specific `Authorize`/`Revoke` action for every meta-message
        // their payload names (spec §4.4).
        if permission::is_system_message(&meta.name) {
            match permission::check_system_message(timeline, &meta.name, first_signer, decoded.global_time, &decoded.payload) {
                None => {
                    trace!(meta = %meta.name, "dropping system message with unparsable payload");
                    continue;
                }
                Some(CheckOutcome::Drop(reason)) => {
                    trace!(meta = %meta.name, reason, "timeline denied system message");
                    continue;
                }
                Some(CheckOutcome::DelayByProof) => {
                    outcome.deferred.push((
                        first_signer,
                        DeferReason::MissingProof {
                            meta_name: meta.name.clone(),
                            global_time: decoded.global_time,
                        },
                    ));
                    continue;
                }
                Some(CheckOutcome::Accept) => {}
            }
        }

        if undo::is_undo_message(&meta.name) {
            match undo::check_undo(store, timeline, community, &meta.name, first_signer, decoded.global_time, &decoded.payload) {
                None => {
                    trace!(meta = %meta.name, "dropping undo message with unparsable payload");
                    continue;
                }
                Some(UndoCheck::Drop(reason)) => {
                    trace!(meta = %meta.name, reason, "timeline denied undo message");
                    continue;
                }
                Some(UndoCheck::DelayByProof) => {
                    outcome.deferred.push((
                        first_signer,
                        DeferReason::MissingProof {
                            meta_name: meta.name.clone(),
                            global_time: decoded.global_time,
                        },
                    ));
                    continue;
                }
                Some(UndoCheck::MissingTarget) => {
                    outcome.deferred.push((first_signer, DeferReason::MissingMessage));
                    continue;
                }
                Some(UndoCheck::Accept) => {}
            }
        }

        let message = Message {
            community: *community,
            meta_name: meta.name.clone(),
            global_time: decoded.global_time,
            sequence_number: decoded.sequence_number,
            authority: decoded.authority,
            payload: decoded.payload,
            raw: Some(raw),
            packet_id: None,
            undone: None,
        };

        match apply_distribution(store, community, meta, message) {
            DistributionOutcome::Accepted(accepted) => {
                if permission::is_system_message(&meta.name) {
                    permission::apply_system_message(
                        store,
                        community,
                        timeline,
                        &meta.name,
                        accepted.global_time,
                        accepted.packet_id.expect("stored message carries a packet id"),
                        &accepted.payload,
                        catalog,
                    );
                }
                if undo::is_undo_message(&meta.name) {
                    match undo::apply_undo(
                        store,
                        community,
                        &meta.name,
                        accepted.first_signer(),
                        &accepted.payload,
                        accepted.packet_id.expect("stored message carries a packet id"),
                        catalog,
                    ) {
                        UndoApplied::DoubleUndo(proof) => {
                            warn!(member = ?proof.member, "blacklisted member for conflicting undo-own messages");
                        }
                        UndoApplied::Applied { .. } | UndoApplied::NoOp | UndoApplied::Malformed => {}
                    }
                }
                outcome.accepted.push(accepted);
            }
            DistributionOutcome::Dropped(reason) => {
                trace!(meta = %meta.name, reason, "distribution policy dropped message");
            }
            DistributionOutcome::Deferred(mid, reason) => outcome.deferred.push((mid, reason)),
            DistributionOutcome::Correction(offender, newest) => {
                outcome.corrections.push((offender, newest));
            }
        }
    }

    // Delivery/sync order (spec §4.6): OutOrder descending, InOrder
    // ascending. Only full-sync meta-messages declare an order.
    if let Distribution::FullSync { order, .. } = meta.distribution {
        match order {
            Order::InOrder => outcome.accepted.sort_by_key(|m| m.global_time),
            Order::OutOrder => outcome.accepted.sort_by(|a, b| b.global_time.cmp(&a.global_time)),
        }
    }

    Ok(outcome)
}

fn effective_resolution(resolution: &Resolution) -> &Resolution {
    match resolution {
        Resolution::Dynamic(inner) => effective_resolution(inner),
        other => other,
    }
}

enum DistributionOutcome {
    Accepted(Message),
    Dropped(&'static str),
    Deferred(Mid, DeferReason),
    /// A `LastN` packet older than the kept window; the offender should
    /// be sent `newest` as a correction (spec §4.6).
    Correction(Mid, Message),
}

/// Enforce the meta-message's distribution policy and persist the
/// message (spec §4.6): last-N window pruning, or sequence-number gap
/// detection for sequenced full-sync.
fn apply_distribution<S: Store>(
    store: &mut S,
    community: &Cid,
    meta: &MetaMessage,
    message: Message,
) -> DistributionOutcome {
    match meta.distribution {
        Distribution::FullSync { sequenced: false, .. } => match store.insert(community, message) {
            Ok(stored) => DistributionOutcome::Accepted(stored),
            Err(_) => DistributionOutcome::Dropped("already stored"),
        },
        Distribution::FullSync { sequenced: true, .. } => {
            let signer = message.first_signer();
            let seq = match message.sequence_number {
                Some(seq) => seq,
                None => return DistributionOutcome::Dropped("sequenced meta-message without a sequence number"),
            };
            let rows: Vec<Message> = store
                .range(community, &meta.name)
                .into_iter()
                .filter(|m| m.first_signer() == signer)
                .collect();
            let highest = rows.iter().filter_map(|m| m.sequence_number).max();
            let last_global_time = highest
                .and_then(|h| rows.iter().find(|m| m.sequence_number == Some(h)))
                .map(|m| m.global_time)
                .unwrap_or(0);

            // A packet can re-fill an already-occupied sequence slot if it
            // carries an earlier global time (spec §4.6 "sequence
            // replace"): the slot's occupant moves, and every row with a
            // later sequence number is now orphaned and dropped with it.
            if let Some(occupant) = rows.iter().find(|m| m.sequence_number == Some(seq)) {
                if message.global_time >= occupant.global_time {
                    return DistributionOutcome::Dropped("sequence replace requires an earlier global time");
                }
                let occupant_id = occupant.packet_id;
                let orphans: Vec<PacketId> = rows
                    .iter()
                    .filter(|m| m.sequence_number.map_or(false, |s| s > seq))
                    .filter_map(|m| m.packet_id)
                    .collect();
                return match store.insert(community, message) {
                    Ok(stored) => {
                        if let Some(id) = occupant_id {
                            let _ = store.evict(id);
                        }
                        for id in orphans {
                            let _ = store.evict(id);
                        }
                        DistributionOutcome::Accepted(stored)
                    }
                    Err(_) => DistributionOutcome::Dropped("already stored"),
                };
            }

            let expected = highest.map(|h| h + 1).unwrap_or(1);
            if seq > expected {
                DistributionOutcome::Deferred(signer, DeferReason::MissingSequence { expected_sequence: expected })
            } else if seq < expected {
                DistributionOutcome::Dropped("stale sequence number")
            } else if message.global_time <= last_global_time {
                DistributionOutcome::Dropped("sequence number requires a global time after the last accepted one")
            } else {
                match store.insert(community, message) {
                    Ok(stored) => DistributionOutcome::Accepted(stored),
                    Err(_) => DistributionOutcome::Dropped("already stored"),
                }
            }
        }
        Distribution::LastN { n, .. } => {
            let key = LastNKey::of(&message);
            let window = store.window(community, &meta.name, key);
            if window.len() >= n as usize {
                let oldest = window.iter().min_by_key(|m| m.global_time);
                if let Some(oldest) = oldest {
                    if message.global_time <= oldest.global_time {
                        let newest = window
                            .iter()
                            .max_by_key(|m| m.global_time)
                            .cloned()
                            .unwrap_or_else(|| oldest.clone());
                        return DistributionOutcome::Correction(message.first_signer(), newest);
                    }
                }
            }
            let stored = match store.insert(community, message) {
                Ok(stored) => stored,
                Err(_) => return DistributionOutcome::Dropped("already stored"),
            };
            let mut window = store.window(community, &meta.name, key);
            window.sort_by_key(|m| m.global_time);
            while window.len() > n as usize {
                let victim = window.remove(0);
                if let Some(id) = victim.packet_id {
                    let _ = store.evict(id);
                }
            }
            DistributionOutcome::Accepted(stored)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SecurityLevel};
    use crate::member::Member;
    use crate::meta_message::{BatchConfiguration, Destination, Order};
    use crate::store::memory::MemoryStore;

    fn meta(distribution: Distribution) -> MetaMessage {
        MetaMessage::new(
            "m",
            Authentication::Member(SecurityLevel::Medium),
            Resolution::Public,
            distribution,
            Destination::Community,
            BatchConfiguration::default(),
        )
    }

    fn signed_packet(kp: &KeyPair, community: &Cid, m: &MetaMessage, global_time: u64, seq: Option<u64>, payload: &[u8]) -> Vec<u8> {
        let sig_len = SecurityLevel::Medium.signature_length();
        let unsigned = Message {
            community: *community,
            meta_name: m.name.clone(),
            global_time,
            sequence_number: seq,
            authority: Authority::Member {
                signer: kp.public_key().mid(),
                sig: crate::crypto::Sig(vec![0u8; sig_len]),
            },
            payload: payload.to_vec(),
            raw: None,
            packet_id: None,
            undone: None,
        };
        let prefix = codec::encode(&unsigned, m, 0);
        let sig = kp.sign(&prefix[..prefix.len() - sig_len]);
        let signed = Message {
            authority: Authority::Member { signer: kp.public_key().mid(), sig },
            ..unsigned
        };
        codec::encode(&signed, m, 0)
    }

    #[test]
    fn full_sync_accepts_unique_packets() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[1u8; 20]);
        let m = meta(Distribution::FullSync { order: Order::InOrder, sequenced: false });
        let mut store = MemoryStore::new();
        store.put_member(&Member::new(kp.public_key())).unwrap();
        let mut timeline = Timeline::new(community);

        let packet = signed_packet(&kp, &community, &m, 5, None, b"hi");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![packet.clone(), packet], &HashMap::new()).unwrap();
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn last_n_prunes_the_oldest_once_the_window_is_full() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[2u8; 20]);
        let m = meta(Distribution::LastN { n: 2, double_member: false });
        let mut store = MemoryStore::new();
        store.put_member(&Member::new(kp.public_key())).unwrap();
        let mut timeline = Timeline::new(community);

        for gt in [1u64, 2, 3] {
            let packet = signed_packet(&kp, &community, &m, gt, None, b"x");
            flush(&mut store, &mut timeline, &community, &m, vec![packet], &HashMap::new()).unwrap();
        }
        let remaining = store.range(&community, "m");
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].global_time, 2);
        assert_eq!(remaining[1].global_time, 3);
    }

    #[test]
    fn last_n_sends_back_a_correction_for_a_stale_packet() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[7u8; 20]);
        let m = meta(Distribution::LastN { n: 2, double_member: false });
        let mut store = MemoryStore::new();
        store.put_member(&Member::new(kp.public_key())).unwrap();
        let mut timeline = Timeline::new(community);

        for gt in [5u64, 6] {
            let packet = signed_packet(&kp, &community, &m, gt, None, b"x");
            let outcome = flush(&mut store, &mut timeline, &community, &m, vec![packet], &HashMap::new()).unwrap();
            assert_eq!(outcome.accepted.len(), 1);
        }

        let stale = signed_packet(&kp, &community, &m, 1, None, b"too old");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![stale], &HashMap::new()).unwrap();
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.corrections.len(), 1);
        let (offender, newest) = &outcome.corrections[0];
        assert_eq!(*offender, kp.public_key().mid());
        assert_eq!(newest.global_time, 6);
        assert_eq!(store.range(&community, "m").len(), 2);
    }

    #[test]
    fn sequenced_full_sync_defers_on_gap_and_accepts_in_order() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[3u8; 20]);
        let m = meta(Distribution::FullSync { order: Order::InOrder, sequenced: true });
        let mut store = MemoryStore::new();
        store.put_member(&Member::new(kp.public_key())).unwrap();
        let mut timeline = Timeline::new(community);

        let ahead = signed_packet(&kp, &community, &m, 10, Some(2), b"second");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![ahead], &HashMap::new()).unwrap();
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.deferred.len(), 1);

        let first = signed_packet(&kp, &community, &m, 9, Some(1), b"first");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![first], &HashMap::new()).unwrap();
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn sequence_replace_moves_the_slot_and_rejects_a_stale_follow_up() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[5u8; 20]);
        let m = meta(Distribution::FullSync { order: Order::InOrder, sequenced: true });
        let mut store = MemoryStore::new();
        store.put_member(&Member::new(kp.public_key())).unwrap();
        let mut timeline = Timeline::new(community);

        let first = signed_packet(&kp, &community, &m, 6, Some(1), b"v1");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![first], &HashMap::new()).unwrap();
        assert_eq!(outcome.accepted.len(), 1);

        // A second packet for seq=1 with an earlier global time replaces
        // the stored one.
        let replacement = signed_packet(&kp, &community, &m, 5, Some(1), b"v0");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![replacement], &HashMap::new()).unwrap();
        assert_eq!(outcome.accepted.len(), 1);
        let rows = store.range(&community, "m");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].global_time, 5);

        // seq=2 must now carry a global time exceeding seq=1's (5, not 6).
        let too_early = signed_packet(&kp, &community, &m, 4, Some(2), b"v2");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![too_early], &HashMap::new()).unwrap();
        assert!(outcome.accepted.is_empty());
        assert!(outcome.deferred.is_empty());
        assert_eq!(store.range(&community, "m").len(), 1);
    }

    #[test]
    fn sequence_replace_orphans_every_later_stored_row() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[6u8; 20]);
        let m = meta(Distribution::FullSync { order: Order::InOrder, sequenced: true });
        let mut store = MemoryStore::new();
        store.put_member(&Member::new(kp.public_key())).unwrap();
        let mut timeline = Timeline::new(community);

        for (gt, seq) in [(10u64, 1u64), (11, 2), (12, 3)] {
            let packet = signed_packet(&kp, &community, &m, gt, Some(seq), b"x");
            let outcome = flush(&mut store, &mut timeline, &community, &m, vec![packet], &HashMap::new()).unwrap();
            assert_eq!(outcome.accepted.len(), 1);
        }
        assert_eq!(store.range(&community, "m").len(), 3);

        let replacement = signed_packet(&kp, &community, &m, 9, Some(1), b"earlier");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![replacement], &HashMap::new()).unwrap();
        assert_eq!(outcome.accepted.len(), 1);
        let rows = store.range(&community, "m");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sequence_number, Some(1));
        assert_eq!(rows[0].global_time, 9);
    }

    #[test]
    fn linear_resolution_defers_an_unrecognised_signer() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[4u8; 20]);
        let m = MetaMessage::new(
            "m",
            Authentication::Member(SecurityLevel::Medium),
            Resolution::Linear,
            Distribution::FullSync { order: Order::InOrder, sequenced: false },
            Destination::Community,
            BatchConfiguration::default(),
        );
        let mut store = MemoryStore::new();
        store.put_member(&Member::new(kp.public_key())).unwrap();
        // Note: community's master differs from kp, so kp holds no grant.
        let mut timeline = Timeline::new(Cid::from_bytes(&[0xFFu8; 20]));

        let packet = signed_packet(&kp, &community, &m, 1, None, b"x");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![packet], &HashMap::new()).unwrap();
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.deferred.len(), 1);
    }

    #[test]
    fn a_blacklisted_members_packet_is_dropped_outright() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[8u8; 20]);
        let m = meta(Distribution::FullSync { order: Order::InOrder, sequenced: false });
        let mut store = MemoryStore::new();
        let mut blacklisted = Member::new(kp.public_key());
        blacklisted.add_tag(crate::member::Tag::Blacklist);
        store.put_member(&blacklisted).unwrap();
        let mut timeline = Timeline::new(community);

        let packet = signed_packet(&kp, &community, &m, 1, None, b"x");
        let outcome = flush(&mut store, &mut timeline, &community, &m, vec![packet], &HashMap::new()).unwrap();
        assert!(outcome.accepted.is_empty());
        assert!(outcome.deferred.is_empty());
        assert_eq!(store.range(&community, "m").len(), 0);
    }

    #[test]
    fn out_order_full_sync_delivers_accepted_messages_descending() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let community = Cid::from_bytes(&[10u8; 20]);
        let m = meta(Distribution::FullSync { order: Order::OutOrder, sequenced: false });
        let mut store = MemoryStore::new();
        store.put_member(&Member::new(kp.public_key())).unwrap();
        let mut timeline = Timeline::new(community);

        let packets: Vec<Vec<u8>> = [3u64, 1, 2]
            .iter()
            .map(|gt| signed_packet(&kp, &community, &m, *gt, None, b"x"))
            .collect();
        let outcome = flush(&mut store, &mut timeline, &community, &m, packets, &HashMap::new()).unwrap();
        let times: Vec<u64> = outcome.accepted.iter().map(|msg| msg.global_time).collect();
        assert_eq!(times, vec![3, 2, 1]);
    }
}
