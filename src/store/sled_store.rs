//! `sled`-backed `Store`: the on-disk database named in spec §4.3 and
//! wired up by the launcher (`--databasefile`).
//!
//! Rows and members are bincode blobs keyed by id in their own trees;
//! `by_signer`/`by_combination` are secondary-index trees mapping a
//! uniqueness key to a packet id, mirroring the `community` / `member` /
//! `sync` / `double_signed_sync` table split the design doc describes.

use super::{LastNKey, Store};
use crate::community::Cid;
use crate::error::{Error, Result};
use crate::member::{Member, Mid};
use crate::message::{Message, PacketId};
use std::path::Path;

pub struct SledStore {
    db: sled::Db,
    members: sled::Tree,
    rows: sled::Tree,
    by_signer: sled::Tree,
    by_combination: sled::Tree,
    malicious_proofs: sled::Tree,
}

fn malicious_proof_key(community: &Cid, member: Mid) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(community.as_bytes());
    key.extend_from_slice(member.as_bytes());
    key
}

fn signer_key(community: &Cid, meta_name: &str, signer: Mid, global_time: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(20 + meta_name.len() + 1 + 20 + 8);
    key.extend_from_slice(community.as_bytes());
    key.extend_from_slice(meta_name.as_bytes());
    key.push(0); // separator; meta names never contain NUL
    key.extend_from_slice(signer.as_bytes());
    key.extend_from_slice(&global_time.to_be_bytes());
    key
}

fn combination_key(community: &Cid, meta_name: &str, a: Mid, b: Mid, global_time: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(20 + meta_name.len() + 1 + 40 + 8);
    key.extend_from_slice(community.as_bytes());
    key.extend_from_slice(meta_name.as_bytes());
    key.push(0);
    key.extend_from_slice(a.as_bytes());
    key.extend_from_slice(b.as_bytes());
    key.extend_from_slice(&global_time.to_be_bytes());
    key
}

impl SledStore {
    /// Open (creating if absent) the database at `path` (spec §6
    /// `--databasefile`).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let members = db.open_tree("members")?;
        let rows = db.open_tree("rows")?;
        let by_signer = db.open_tree("by_signer")?;
        let by_combination = db.open_tree("by_combination")?;
        let malicious_proofs = db.open_tree("malicious_proofs")?;
        Ok(Self {
            db,
            members,
            rows,
            by_signer,
            by_combination,
            malicious_proofs,
        })
    }

    fn load_row(&self, packet_id: PacketId) -> Result<Option<Message>> {
        match self.rows.get(packet_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl Store for SledStore {
    fn put_member(&mut self, member: &Member) -> Result<()> {
        let bytes = bincode::serialize(member)?;
        self.members.insert(member.mid().as_bytes(), bytes)?;
        Ok(())
    }

    fn member(&self, mid: Mid) -> Option<Member> {
        self.members
            .get(mid.as_bytes())
            .ok()
            .flatten()
            .and_then(|bytes| bincode::deserialize(&bytes).ok())
    }

    fn insert(&mut self, community: &Cid, msg: Message) -> Result<Message> {
        let key = LastNKey::of(&msg);
        match key {
            LastNKey::Single(signer) => {
                let sk = signer_key(community, &msg.meta_name, signer, msg.global_time);
                if self.by_signer.contains_key(&sk)? {
                    return Err(Error::Duplicate);
                }
            }
            LastNKey::Combination(a, b) => {
                let ck = combination_key(community, &msg.meta_name, a, b, msg.global_time);
                if self.by_combination.contains_key(&ck)? {
                    return Err(Error::Duplicate);
                }
            }
        }

        let id = self.db.generate_id()?;
        let mut stored = msg;
        stored.packet_id = Some(id);

        match key {
            LastNKey::Single(signer) => {
                let sk = signer_key(community, &stored.meta_name, signer, stored.global_time);
                self.by_signer.insert(sk, &id.to_be_bytes())?;
            }
            LastNKey::Combination(a, b) => {
                let ck = combination_key(community, &stored.meta_name, a, b, stored.global_time);
                self.by_combination.insert(ck, &id.to_be_bytes())?;
            }
        }

        let bytes = bincode::serialize(&stored)?;
        self.rows.insert(id.to_be_bytes(), bytes)?;
        Ok(stored)
    }

    fn fetch_by_signer(
        &self,
        community: &Cid,
        meta_name: &str,
        signer: Mid,
        global_time: u64,
    ) -> Option<Message> {
        let sk = signer_key(community, meta_name, signer, global_time);
        let id_bytes = self.by_signer.get(&sk).ok()??;
        let id = PacketId::from_be_bytes(id_bytes.as_ref().try_into().ok()?);
        self.load_row(id).ok()?
    }

    fn fetch_by_combination(
        &self,
        community: &Cid,
        meta_name: &str,
        combination: (Mid, Mid),
        global_time: u64,
    ) -> Option<Message> {
        let ck = combination_key(community, meta_name, combination.0, combination.1, global_time);
        let id_bytes = self.by_combination.get(&ck).ok()??;
        let id = PacketId::from_be_bytes(id_bytes.as_ref().try_into().ok()?);
        self.load_row(id).ok()?
    }

    fn by_packet_id(&self, packet_id: PacketId) -> Option<Message> {
        self.load_row(packet_id).ok()?
    }

    fn range(&self, community: &Cid, meta_name: &str) -> Vec<Message> {
        let mut rows: Vec<Message> = self
            .rows
            .iter()
            .values()
            .filter_map(|v| v.ok())
            .filter_map(|bytes| bincode::deserialize::<Message>(&bytes).ok())
            .filter(|m| &m.community == community && m.meta_name == meta_name)
            .collect();
        rows.sort_by_key(|m| m.global_time);
        rows
    }

    fn window(&self, community: &Cid, meta_name: &str, key: LastNKey) -> Vec<Message> {
        let mut rows: Vec<Message> = self
            .rows
            .iter()
            .values()
            .filter_map(|v| v.ok())
            .filter_map(|bytes| bincode::deserialize::<Message>(&bytes).ok())
            .filter(|m| &m.community == community && m.meta_name == meta_name && LastNKey::of(m) == key)
            .collect();
        rows.sort_by_key(|m| m.global_time);
        rows
    }

    fn highest_sequence(&self, community: &Cid, meta_name: &str, signer: Mid) -> Option<u64> {
        self.rows
            .iter()
            .values()
            .filter_map(|v| v.ok())
            .filter_map(|bytes| bincode::deserialize::<Message>(&bytes).ok())
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
        if let Some(row) = self.load_row(packet_id)? {
            match LastNKey::of(&row) {
                LastNKey::Single(signer) => {
                    let sk = signer_key(&row.community, &row.meta_name, signer, row.global_time);
                    self.by_signer.remove(sk)?;
                }
                LastNKey::Combination(a, b) => {
                    let ck = combination_key(&row.community, &row.meta_name, a, b, row.global_time);
                    self.by_combination.remove(ck)?;
                }
            }
            self.rows.remove(packet_id.to_be_bytes())?;
        }
        Ok(())
    }

    fn mark_undone(&mut self, target: PacketId, undoer: PacketId) -> Result<()> {
        let mut row = self.load_row(target)?.ok_or(Error::NotFound)?;
        row.undone = Some(undoer);
        let bytes = bincode::serialize(&row)?;
        self.rows.insert(target.to_be_bytes(), bytes)?;
        Ok(())
    }

    fn clear_undone(&mut self, target: PacketId) -> Result<()> {
        let mut row = self.load_row(target)?.ok_or(Error::NotFound)?;
        row.undone = None;
        let bytes = bincode::serialize(&row)?;
        self.rows.insert(target.to_be_bytes(), bytes)?;
        Ok(())
    }

    fn delete_where(&mut self, community: &Cid, member: Mid) -> Result<usize> {
        let victims: Vec<PacketId> = self
            .rows
            .iter()
            .values()
            .filter_map(|v| v.ok())
            .filter_map(|bytes| bincode::deserialize::<Message>(&bytes).ok())
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
        let key = malicious_proof_key(community, member);
        let mut existing: Vec<Message> = self
            .malicious_proofs
            .get(&key)?
            .and_then(|bytes| bincode::deserialize(&bytes).ok())
            .unwrap_or_default();
        existing.extend(packets);
        let bytes = bincode::serialize(&existing)?;
        self.malicious_proofs.insert(key, bytes)?;
        Ok(())
    }

    fn malicious_proofs(&self, community: &Cid, member: Mid) -> Vec<Message> {
        let key = malicious_proof_key(community, member);
        self.malicious_proofs
            .get(&key)
            .ok()
            .flatten()
            .and_then(|bytes| bincode::deserialize(&bytes).ok())
            .unwrap_or_default()
    }
}
