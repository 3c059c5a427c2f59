//! Interprets the payload of the three system meta-messages that mutate
//! the `Timeline` — `dispersy-authorize`, `dispersy-revoke`,
//! `dispersy-dynamic-settings` (spec §4.4, §4.8) — once they've passed
//! the generic batch admission pipeline.
//!
//! These are ordinary messages as far as the codec and store are
//! concerned; only their payload shape and the side effect of accepting
//! them are special.

use crate::community::Cid;
use crate::member::Mid;
use crate::message::PacketId;
use crate::meta_message::{MetaMessage, Resolution};
use crate::store::Store;
use crate::timeline::{Action, CheckOutcome, Timeline};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const AUTHORIZE: &str = "dispersy-authorize";
pub const REVOKE: &str = "dispersy-revoke";
pub const DYNAMIC_SETTINGS: &str = "dispersy-dynamic-settings";

/// `dispersy-authorize` payload: the granter gives each listed
/// `(subject, meta-message, action)` triple to its subject.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizePayload {
    pub grants: Vec<(Mid, String, Action)>,
}

/// `dispersy-revoke` payload: the revoker closes each listed triple's
/// currently-open interval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevokePayload {
    pub revokes: Vec<(Mid, String, Action)>,
}

/// `dispersy-dynamic-settings` payload: from this message's global time
/// onward, `meta_name`'s effective resolution policy changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DynamicSettingsPayload {
    pub meta_name: String,
    pub resolution: Resolution,
}

/// Whether `meta_name` is one of the three system kinds this module
/// understands.
pub fn is_system_message(meta_name: &str) -> bool {
    matches!(meta_name, AUTHORIZE | REVOKE | DYNAMIC_SETTINGS)
}

/// Pre-acceptance check: does `signer` actually hold the `Authorize`
/// (respectively `Revoke`) action for every meta-message named in the
/// payload, at `global_time`? Returns `None` for payloads that fail to
/// parse (treated as a hard drop by the caller) and otherwise the
/// strictest outcome across all triples (a single `DelayByProof` or
/// `Drop` anywhere fails the whole message, per spec §4.4's "recursively
/// up to master").
pub fn check_system_message(
    timeline: &Timeline,
    meta_name: &str,
    signer: Mid,
    global_time: u64,
    payload: &[u8],
) -> Option<CheckOutcome> {
    match meta_name {
        AUTHORIZE => {
            let parsed: AuthorizePayload = bincode::deserialize(payload).ok()?;
            Some(strictest(parsed.grants.iter().map(|(_, meta, _)| {
                timeline.check_action(signer, meta, Action::Authorize, global_time)
            })))
        }
        REVOKE => {
            let parsed: RevokePayload = bincode::deserialize(payload).ok()?;
            Some(strictest(parsed.revokes.iter().map(|(_, meta, _)| {
                timeline.check_action(signer, meta, Action::Revoke, global_time)
            })))
        }
        DYNAMIC_SETTINGS => {
            // Changing the resolution policy itself requires holding
            // `Authorize` on the target meta-message: the same gate that
            // controls who may delegate permissions for it at all.
            let parsed: DynamicSettingsPayload = bincode::deserialize(payload).ok()?;
            Some(timeline.check_action(signer, &parsed.meta_name, Action::Authorize, global_time))
        }
        _ => None,
    }
}

fn strictest(outcomes: impl Iterator<Item = CheckOutcome>) -> CheckOutcome {
    let mut best = CheckOutcome::Accept;
    for outcome in outcomes {
        match (&best, &outcome) {
            (CheckOutcome::Drop(_), _) => break,
            (_, CheckOutcome::Drop(_)) => {
                best = outcome;
                break;
            }
            (CheckOutcome::Accept, CheckOutcome::DelayByProof) => best = outcome,
            _ => {}
        }
    }
    best
}

/// Apply an already-accepted system message's effect to `timeline` (and,
/// for `dispersy-dynamic-settings`, to `store`: see
/// [`cascade_dynamic_settings`]). `proof` is the message's own
/// `packet_id` (the proof future proof chases will point to). `catalog`
/// resolves a meta-message by name so the cascade can invoke its undo
/// callback on every row it undoes or redoes.
pub fn apply_system_message<S: Store>(
    store: &mut S,
    community: &Cid,
    timeline: &mut Timeline,
    meta_name: &str,
    global_time: u64,
    proof: PacketId,
    payload: &[u8],
    catalog: &HashMap<String, MetaMessage>,
) {
    match meta_name {
        AUTHORIZE => {
            if let Ok(parsed) = bincode::deserialize::<AuthorizePayload>(payload) {
                timeline.apply_authorize(&parsed.grants, global_time, proof);
            }
        }
        REVOKE => {
            if let Ok(parsed) = bincode::deserialize::<RevokePayload>(payload) {
                timeline.apply_revoke(&parsed.revokes, global_time);
            }
        }
        DYNAMIC_SETTINGS => {
            if let Ok(parsed) = bincode::deserialize::<DynamicSettingsPayload>(payload) {
                timeline.apply_dynamic_settings(&parsed.meta_name, parsed.resolution.clone(), global_time, proof);
                cascade_dynamic_settings(store, timeline, community, &parsed.meta_name, &parsed.resolution, global_time, proof, catalog);
            }
        }
        _ => {}
    }
}

fn effective_resolution(resolution: &Resolution) -> &Resolution {
    match resolution {
        Resolution::Dynamic(inner) => effective_resolution(inner),
        other => other,
    }
}

/// Re-evaluate every already-stored row of `meta_name` against the
/// policy that `dispersy-dynamic-settings` just switched in at
/// `global_time` (spec §8 "Dynamic settings cascade").
///
/// Switching to `Linear` marks every earlier row whose signer would not
/// hold `Permit` under the new policy as undone, proven by this
/// dynamic-settings message's own packet id. Switching back to `Public`
/// clears `undone` on rows this mechanism (and only this mechanism) had
/// undone, leaving any unrelated undo (`dispersy-undo-own`/`-other`)
/// untouched.
fn cascade_dynamic_settings<S: Store>(
    store: &mut S,
    timeline: &Timeline,
    community: &Cid,
    meta_name: &str,
    resolution: &Resolution,
    global_time: u64,
    proof: PacketId,
    catalog: &HashMap<String, MetaMessage>,
) {
    let callback = catalog.get(meta_name).and_then(|m| m.undo_callback.as_ref());
    let rows = store.range(community, meta_name);
    match effective_resolution(resolution) {
        Resolution::Linear => {
            for row in rows {
                if row.global_time >= global_time || row.undone.is_some() {
                    continue;
                }
                let permitted = matches!(
                    timeline.check_action(row.first_signer(), meta_name, Action::Permit, row.global_time),
                    CheckOutcome::Accept
                );
                if !permitted {
                    if let Some(packet_id) = row.packet_id {
                        let _ = store.mark_undone(packet_id, proof);
                        if let Some(cb) = callback {
                            let mut undone_row = row.clone();
                            undone_row.undone = Some(proof);
                            cb(&undone_row);
                        }
                    }
                }
            }
        }
        Resolution::Public => {
            for row in rows {
                let packet_id = match row.packet_id {
                    Some(id) => id,
                    None => continue,
                };
                let undo_id = match row.undone {
                    Some(id) => id,
                    None => continue,
                };
                let undone_by_cascade = store
                    .by_packet_id(undo_id)
                    .map(|undoer| undoer.meta_name == DYNAMIC_SETTINGS)
                    .unwrap_or(false);
                if undone_by_cascade {
                    let _ = store.clear_undone(packet_id);
                    if let Some(cb) = callback {
                        let mut redone_row = row.clone();
                        redone_row.undone = None;
                        cb(&redone_row);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SecurityLevel};
    use crate::member::{Member, Mid};
    use crate::message::{Authority, Message};
    use crate::store::memory::MemoryStore;

    fn mid(byte: u8) -> Mid {
        Mid::from_bytes(&[byte; 20])
    }

    fn stored_row(store: &mut MemoryStore, community: Cid, signer: Mid, meta_name: &str, global_time: u64) -> Message {
        let msg = Message {
            community,
            meta_name: meta_name.to_string(),
            global_time,
            sequence_number: None,
            authority: Authority::Member {
                signer,
                sig: crate::crypto::Sig(vec![0u8; SecurityLevel::Medium.signature_length()]),
            },
            payload: vec![],
            raw: None,
            packet_id: None,
            undone: None,
        };
        store.insert(&community, msg).unwrap()
    }

    #[test]
    fn master_authorize_is_accepted_without_prior_grants() {
        let master = mid(1);
        let timeline = Timeline::new(master);
        let payload = bincode::serialize(&AuthorizePayload {
            grants: vec![(mid(2), "msg".to_string(), Action::Permit)],
        })
        .unwrap();
        let outcome = check_system_message(&timeline, AUTHORIZE, master, 1, &payload).unwrap();
        assert_eq!(outcome, CheckOutcome::Accept);
    }

    #[test]
    fn authorize_from_an_unauthorized_member_delays() {
        let master = mid(1);
        let stranger = mid(2);
        let timeline = Timeline::new(master);
        let payload = bincode::serialize(&AuthorizePayload {
            grants: vec![(mid(3), "msg".to_string(), Action::Permit)],
        })
        .unwrap();
        let outcome = check_system_message(&timeline, AUTHORIZE, stranger, 1, &payload).unwrap();
        assert_eq!(outcome, CheckOutcome::DelayByProof);
    }

    #[test]
    fn apply_authorize_then_check_permit_round_trips() {
        let master = mid(1);
        let owner = mid(2);
        let mut timeline = Timeline::new(master);
        let payload = bincode::serialize(&AuthorizePayload {
            grants: vec![(owner, "msg".to_string(), Action::Permit)],
        })
        .unwrap();
        let community = Cid::from_bytes(&[9u8; 20]);
        let mut store = MemoryStore::new();
        apply_system_message(&mut store, &community, &mut timeline, AUTHORIZE, 5, 42, &payload, &HashMap::new());
        assert_eq!(
            timeline.check_action(owner, "msg", Action::Permit, 5),
            CheckOutcome::Accept
        );
        assert_eq!(timeline.minimal_proof(owner, "msg", Action::Permit, 5), Some(42));
    }

    #[test]
    fn switching_to_linear_undoes_earlier_rows_by_unpermitted_members() {
        let master = mid(1);
        let stranger = mid(2);
        let community = Cid::from_bytes(&[10u8; 20]);
        let mut store = MemoryStore::new();
        store.put_member(&Member::new(KeyPair::generate(SecurityLevel::Medium).public_key())).unwrap();
        let mut timeline = Timeline::new(master);

        let row = stored_row(&mut store, community, stranger, "text", 5);
        assert!(row.undone.is_none());

        let payload = bincode::serialize(&DynamicSettingsPayload {
            meta_name: "text".to_string(),
            resolution: Resolution::Linear,
        })
        .unwrap();
        apply_system_message(&mut store, &community, &mut timeline, DYNAMIC_SETTINGS, 20, 99, &payload, &HashMap::new());

        let row = store.fetch_by_signer(&community, "text", stranger, 5).unwrap();
        assert_eq!(row.undone, Some(99));
    }

    #[test]
    fn switching_to_linear_spares_a_permitted_member() {
        let master = mid(1);
        let owner = mid(2);
        let community = Cid::from_bytes(&[11u8; 20]);
        let mut store = MemoryStore::new();
        let mut timeline = Timeline::new(master);
        timeline.apply_authorize(&[(owner, "text".to_string(), Action::Permit)], 1, 7);

        let row = stored_row(&mut store, community, owner, "text", 5);
        assert!(row.undone.is_none());

        let payload = bincode::serialize(&DynamicSettingsPayload {
            meta_name: "text".to_string(),
            resolution: Resolution::Linear,
        })
        .unwrap();
        apply_system_message(&mut store, &community, &mut timeline, DYNAMIC_SETTINGS, 20, 99, &payload, &HashMap::new());

        let row = store.fetch_by_signer(&community, "text", owner, 5).unwrap();
        assert!(row.undone.is_none());
    }

    #[test]
    fn switching_back_to_public_clears_the_cascades_own_undo() {
        let master = mid(1);
        let stranger = mid(2);
        let community = Cid::from_bytes(&[12u8; 20]);
        let mut store = MemoryStore::new();
        let mut timeline = Timeline::new(master);

        stored_row(&mut store, community, stranger, "text", 5);
        let to_linear = bincode::serialize(&DynamicSettingsPayload {
            meta_name: "text".to_string(),
            resolution: Resolution::Linear,
        })
        .unwrap();
        apply_system_message(&mut store, &community, &mut timeline, DYNAMIC_SETTINGS, 20, 99, &to_linear, &HashMap::new());
        assert!(store.fetch_by_signer(&community, "text", stranger, 5).unwrap().undone.is_some());

        let to_public = bincode::serialize(&DynamicSettingsPayload {
            meta_name: "text".to_string(),
            resolution: Resolution::Public,
        })
        .unwrap();
        apply_system_message(&mut store, &community, &mut timeline, DYNAMIC_SETTINGS, 30, 100, &to_public, &HashMap::new());
        assert!(store.fetch_by_signer(&community, "text", stranger, 5).unwrap().undone.is_none());
    }

    #[test]
    fn switching_back_to_public_leaves_an_unrelated_undo_alone() {
        let master = mid(1);
        let stranger = mid(2);
        let community = Cid::from_bytes(&[13u8; 20]);
        let mut store = MemoryStore::new();
        let mut timeline = Timeline::new(master);

        let row = stored_row(&mut store, community, stranger, "text", 5);
        store.mark_undone(row.packet_id.unwrap(), 55).unwrap();

        let to_public = bincode::serialize(&DynamicSettingsPayload {
            meta_name: "text".to_string(),
            resolution: Resolution::Public,
        })
        .unwrap();
        apply_system_message(&mut store, &community, &mut timeline, DYNAMIC_SETTINGS, 30, 100, &to_public, &HashMap::new());
        assert_eq!(store.fetch_by_signer(&community, "text", stranger, 5).unwrap().undone, Some(55));
    }

    #[test]
    fn cascade_invokes_the_targets_undo_callback_on_undo_and_redo() {
        let master = mid(1);
        let stranger = mid(2);
        let community = Cid::from_bytes(&[14u8; 20]);
        let mut store = MemoryStore::new();
        let mut timeline = Timeline::new(master);
        stored_row(&mut store, community, stranger, "text", 5);

        let calls = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls_cb = calls.clone();
        let text_meta = crate::meta_message::MetaMessage::new(
            "text",
            crate::meta_message::Authentication::Member(SecurityLevel::Medium),
            Resolution::Public,
            crate::meta_message::Distribution::FullSync {
                order: crate::meta_message::Order::InOrder,
                sequenced: false,
            },
            crate::meta_message::Destination::Community,
            crate::meta_message::BatchConfiguration::default(),
        )
        .with_undo_callback(std::sync::Arc::new(move |msg| calls_cb.lock().unwrap().push(msg.undone)));
        let mut catalog = HashMap::new();
        catalog.insert("text".to_string(), text_meta);

        let to_linear = bincode::serialize(&DynamicSettingsPayload {
            meta_name: "text".to_string(),
            resolution: Resolution::Linear,
        })
        .unwrap();
        apply_system_message(&mut store, &community, &mut timeline, DYNAMIC_SETTINGS, 20, 99, &to_linear, &catalog);

        let to_public = bincode::serialize(&DynamicSettingsPayload {
            meta_name: "text".to_string(),
            resolution: Resolution::Public,
        })
        .unwrap();
        apply_system_message(&mut store, &community, &mut timeline, DYNAMIC_SETTINGS, 30, 100, &to_public, &catalog);

        assert_eq!(*calls.lock().unwrap(), vec![Some(99), None]);
    }
}
