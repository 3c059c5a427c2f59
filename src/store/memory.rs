//! In-memory `Store`, used by unit/integration tests and anywhere
//! persistence isn't required (spec §4.3 names this an acceptable
//! backing alongside the on-disk one).

use super::{LastNKey, Store};
use crate::community::Cid;
use crate::error::{Error, Result};
use crate::member::{Member, Mid};
use crate::message::{Message, PacketId};
use std::collections::HashMap;

#[derive(Clone, Eq, PartialEq, Hash)]
struct SignerKey(Cid, String, Mid, u64);

#[derive(Clone, Eq, PartialEq, Hash)]
struct CombinationKey(Cid, String, Mid, Mid, u64);

/// A plain in-memory `Store`. Not thread-safe on its own; a `Context`
/// owns exactly one instance per community.
#[derive(Default)]
pub struct MemoryStore {
    members: HashMap<Mid, Member>,
    rows: HashMap<PacketId, Message>,
    by_signer: HashMap<SignerKey, PacketId>,
    by_combination: HashMap<CombinationKey, PacketId>,
    malicious_proofs: HashMap<(Cid, Mid), Vec<Message>>,
    next_id: PacketId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }
}

impl Store for MemoryStore {
    fn put_member(&mut self, member: &Member) -> Result<()> {
        let _ = self.members.insert(member.mid(), member.clone());
        Ok(())
    }

    fn member(&self, mid: Mid) -> Option<Member> {
        self.members.get(&mid).cloned()
    }

    fn insert(&mut self, community: &Cid, msg: Message) -> Result<Message> {
        let key = LastNKey::of(&msg);
        match key {
            LastNKey::Single(signer) => {
                let sk = SignerKey(*community, msg.meta_name.clone(), signer, msg.global_time);
                if self.by_signer.contains_key(&sk) {
                    return Err(Error::Duplicate);
                }
            }
            LastNKey::Combination(a, b) => {
                let ck = CombinationKey(*community, msg.meta_name.clone(), a, b, msg.global_time);
                if self.by_combination.contains_key(&ck) {
                    return Err(Error::Duplicate);
                }
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let mut stored = msg;
        stored.packet_id = Some(id);

        match key {
            LastNKey::Single(signer) => {
                let sk = SignerKey(*community, stored.meta_name.clone(), signer, stored.global_time);
                let _ = self.by_signer.insert(sk, id);
            }
            LastNKey::Combination(a, b) => {
                let ck = CombinationKey(*community, stored.meta_name.clone(), a, b, stored.global_time);
                let _ = self.by_combination.insert(ck, id);
            }
        }
        let _ = self.rows.insert(id, stored.clone());
        Ok(stored)
    }

    fn fetch_by_signer(
        &self,
        community: &Cid,
        meta_name: &str,
        signer: Mid,
        global_time: u64,
    ) -> Option<Message> {
        let sk = SignerKey(*community, meta_name.to_string(), signer, global_time);
        self.by_signer.get(&sk).and_then(|id| self.rows.get(id)).cloned()
    }

    fn fetch_by_combination(
        &self,
        community: &Cid,
        meta_name: &str,
        combination: (Mid, Mid),
        global_time: u64,
    ) -> Option<Message> {
        let ck = CombinationKey(
            *community,
            meta_name.to_string(),
            combination.0,
            combination.1,
            global_time,
        );
        self.by_combination
            .get(&ck)
            .and_then(|id| self.rows.get(id))
            .cloned()
    }

    fn by_packet_id(&self, packet_id: PacketId) -> Option<Message> {
        self.rows.get(&packet_id).cloned()
    }

    fn range(&self, community: &Cid, meta_name: &str) -> Vec<Message> {
        let mut rows: Vec<Message> = self
            .rows
            .values()
            .filter(|m| &m.community == community && m.meta_name == meta_name)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.global_time);
        rows
    }

    fn window(&self, community: &Cid, meta_name: &str, key: LastNKey) -> Vec<Message> {
        let mut rows: Vec<Message> = self
            .rows
            .values()
            .filter(|m| &m.community == community && m.meta_name == meta_name && LastNKey::of(m) == key)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.global_time);
        rows
    }

    fn highest_sequence(&self, community: &Cid, meta_name: &str, signer: Mid) -> Option<u64> {
        self.rows
            .values()
            .filter(|m| {
                &m.community == community
                    && m.meta_name == meta_name
                    && m.first_signer() == signer
                    && m.sequence_number.is_some()
            })
            .filter_map(|m| m.sequence_number)
            .max()
    }

    fn evict(&mut self, packet_id: PacketId) -> Result<()> {
        if let Some(row) = self.rows.remove(&packet_id) {
            match LastNKey::of(&row) {
                LastNKey::Single(signer) => {
                    let sk = SignerKey(row.community, row.meta_name.clone(), signer, row.global_time);
                    let _ = self.by_signer.remove(&sk);
                }
                LastNKey::Combination(a, b) => {
                    let ck = CombinationKey(row.community, row.meta_name.clone(), a, b, row.global_time);
                    let _ = self.by_combination.remove(&ck);
                }
            }
        }
        Ok(())
    }

    fn mark_undone(&mut self, target: PacketId, undoer: PacketId) -> Result<()> {
        match self.rows.get_mut(&target) {
            Some(row) => {
                row.undone = Some(undoer);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    fn clear_undone(&mut self, target: PacketId) -> Result<()> {
        match self.rows.get_mut(&target) {
            Some(row) => {
                row.undone = None;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    fn delete_where(&mut self, community: &Cid, member: Mid) -> Result<usize> {
        let victims: Vec<PacketId> = self
            .rows
            .values()
            .filter(|m| &m.community == community && m.first_signer() == member)
            .filter_map(|m| m.packet_id)
            .collect();
        let count = victims.len();
        for id in victims {
            self.evict(id)?;
        }
        Ok(count)
    }

    fn put_malicious_proof(&mut self, community: &Cid, member: Mid, packets: Vec<Message>) -> Result<()> {
        self.malicious_proofs.entry((*community, member)).or_default().extend(packets);
        Ok(())
    }

    fn malicious_proofs(&self, community: &Cid, member: Mid) -> Vec<Message> {
        self.malicious_proofs.get(&(*community, member)).cloned().unwrap_or_default()
    }
}
