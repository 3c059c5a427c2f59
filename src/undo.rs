//! Undo engine (design doc component 4.8): `dispersy-undo-own`,
//! `dispersy-undo-other`, and the double-undo response.
//!
//! An undo message never deletes its target; it sets the target row's
//! `undone` marker to the undo message's own packet id. A member who
//! issues two different `dispersy-undo-own` messages against the same
//! target has equivocated (the only way to produce two distinct valid
//! signatures over two different undo claims for one target) and is
//! blacklisted, with every row they authored purged (spec §4.8).

use crate::community::Cid;
use crate::member::{Member, Mid, Tag};
use crate::message::PacketId;
use crate::meta_message::MetaMessage;
use crate::store::Store;
use crate::timeline::{Action, CheckOutcome, Timeline};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const UNDO_OWN: &str = "dispersy-undo-own";
pub const UNDO_OTHER: &str = "dispersy-undo-other";

/// `dispersy-undo-own` payload: the target is implicitly authored by
/// this message's own signer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UndoOwnPayload {
    pub target_meta_name: String,
    pub target_global_time: u64,
}

/// `dispersy-undo-other` payload: the target may be authored by anyone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UndoOtherPayload {
    pub target_member: Mid,
    pub target_meta_name: String,
    pub target_global_time: u64,
}

/// Whether `meta_name` is one of the two undo kinds this module
/// understands.
pub fn is_undo_message(meta_name: &str) -> bool {
    matches!(meta_name, UNDO_OWN | UNDO_OTHER)
}

/// The outcome of checking an undo message before it is stored.
#[derive(Debug, Eq, PartialEq)]
pub enum UndoCheck {
    Accept,
    MissingTarget,
    DelayByProof,
    Drop(&'static str),
}

/// Pre-acceptance check: does the target exist, and (for `undo-other`)
/// does `signer` hold `Action::Undo` for the target's meta-message at
/// the undo message's own global time?
pub fn check_undo<S: Store>(
    store: &S,
    timeline: &Timeline,
    community: &Cid,
    meta_name: &str,
    signer: Mid,
    global_time: u64,
    payload: &[u8],
) -> Option<UndoCheck> {
    match meta_name {
        UNDO_OWN => {
            let parsed: UndoOwnPayload = bincode::deserialize(payload).ok()?;
            let target = store.fetch_by_signer(community, &parsed.target_meta_name, signer, parsed.target_global_time);
            if target.is_none() {
                return Some(UndoCheck::MissingTarget);
            }
            // "Requires the member to still be permitted to author the
            // target meta-message" (spec §4.8) — checked at the undo
            // message's own global time, not the target's.
            Some(match timeline.check_action(signer, &parsed.target_meta_name, Action::Permit, global_time) {
                CheckOutcome::Accept => UndoCheck::Accept,
                CheckOutcome::DelayByProof => UndoCheck::DelayByProof,
                CheckOutcome::Drop(reason) => UndoCheck::Drop(reason),
            })
        }
        UNDO_OTHER => {
            let parsed: UndoOtherPayload = bincode::deserialize(payload).ok()?;
            let target = store.fetch_by_signer(
                community,
                &parsed.target_meta_name,
                parsed.target_member,
                parsed.target_global_time,
            );
            if target.is_none() {
                return Some(UndoCheck::MissingTarget);
            }
            Some(match timeline.check_action(signer, &parsed.target_meta_name, Action::Undo, global_time) {
                CheckOutcome::Accept => UndoCheck::Accept,
                CheckOutcome::DelayByProof => UndoCheck::DelayByProof,
                CheckOutcome::Drop(reason) => UndoCheck::Drop(reason),
            })
        }
        _ => None,
    }
}

/// Proof of equivocation: `member` issued two distinct `undo-own`
/// messages targeting the same row.
#[derive(Clone, Debug)]
pub struct MaliciousProof {
    pub member: Mid,
    pub first_undo: PacketId,
    pub second_undo: PacketId,
}

/// The outcome of applying an already-stored undo message.
pub enum UndoApplied {
    /// The target was marked undone by this message.
    Applied { target_packet_id: PacketId },
    /// The target was already undone by this very message (replay).
    NoOp,
    /// Equivocation detected; `member` has been blacklisted and purged.
    DoubleUndo(MaliciousProof),
    /// Payload didn't parse or target has since vanished.
    Malformed,
}

/// Apply an already-accepted, already-stored undo message's effect.
/// `undo_packet_id` is the undo message's own packet id (which becomes
/// the target's new `undone` marker). `catalog` resolves the target's
/// meta-message so its undo callback, if any, can be invoked once with
/// the now-undone target.
pub fn apply_undo<S: Store>(
    store: &mut S,
    community: &Cid,
    meta_name: &str,
    signer: Mid,
    payload: &[u8],
    undo_packet_id: PacketId,
    catalog: &HashMap<String, MetaMessage>,
) -> UndoApplied {
    let (target_meta_name, target_member, target_global_time) = match meta_name {
        UNDO_OWN => match bincode::deserialize::<UndoOwnPayload>(payload) {
            Ok(p) => (p.target_meta_name, signer, p.target_global_time),
            Err(_) => return UndoApplied::Malformed,
        },
        UNDO_OTHER => match bincode::deserialize::<UndoOtherPayload>(payload) {
            Ok(p) => (p.target_meta_name, p.target_member, p.target_global_time),
            Err(_) => return UndoApplied::Malformed,
        },
        _ => return UndoApplied::Malformed,
    };

    let target = match store.fetch_by_signer(community, &target_meta_name, target_member, target_global_time) {
        Some(t) => t,
        None => return UndoApplied::Malformed,
    };
    let target_packet_id = match target.packet_id {
        Some(id) => id,
        None => return UndoApplied::Malformed,
    };

    match target.undone {
        None => {
            let _ = store.mark_undone(target_packet_id, undo_packet_id);
            if let Some(cb) = catalog.get(&target_meta_name).and_then(|m| m.undo_callback.as_ref()) {
                let mut undone_target = target.clone();
                undone_target.undone = Some(undo_packet_id);
                cb(&undone_target);
            }
            UndoApplied::Applied { target_packet_id }
        }
        Some(existing) if existing == undo_packet_id => UndoApplied::NoOp,
        Some(existing) if meta_name == UNDO_OWN => {
            let proof = MaliciousProof {
                member: signer,
                first_undo: existing,
                second_undo: undo_packet_id,
            };
            let proof_packets: Vec<crate::message::Message> = [existing, undo_packet_id]
                .iter()
                .filter_map(|id| store.by_packet_id(*id))
                .collect();
            blacklist_and_purge(store, community, signer, proof_packets);
            UndoApplied::DoubleUndo(proof)
        }
        Some(_) => UndoApplied::NoOp,
    }
}

/// Blacklist `member`, retain `proof_packets` (the two conflicting
/// undo packets) as malicious proof, then purge every other row they
/// authored (spec §4.8).
fn blacklist_and_purge<S: Store>(store: &mut S, community: &Cid, member: Mid, proof_packets: Vec<crate::message::Message>) {
    if let Some(mut m) = store.member(member) {
        m.add_tag(Tag::Blacklist);
        let _ = store.put_member(&m);
    }
    let _ = store.put_malicious_proof(community, member, proof_packets);
    let _ = store.delete_where(community, member);
}
