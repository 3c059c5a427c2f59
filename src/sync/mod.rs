//! Sync / anti-entropy (design doc component 4.7): the bloom-filter
//! sync filter, the walker's introduction-request/response exchange,
//! and the four missing-* handlers.

pub mod bloom;
pub mod request_cache;

use crate::community::Cid;
use crate::member::{Member, Mid};
use crate::message::Message;
use crate::meta_message::Order;
use crate::store::Store;
use crate::timeline::{Action, Timeline};
use bloom::BloomFilter;
use serde::{Deserialize, Serialize};

pub const INTRODUCTION_REQUEST: &str = "dispersy-introduction-request";
pub const INTRODUCTION_RESPONSE: &str = "dispersy-introduction-response";
pub const MISSING_PROOF: &str = "dispersy-missing-proof";
pub const MISSING_MESSAGE: &str = "dispersy-missing-message";
pub const MISSING_SEQUENCE: &str = "dispersy-missing-sequence";
pub const MISSING_IDENTITY: &str = "dispersy-missing-identity";

/// The anti-entropy descriptor carried by an introduction-request (spec
/// §4.7): `(low_global_time, bits, modulo, offset, bloom_bytes)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncFilter {
    pub low_global_time: u64,
    pub bits: usize,
    pub modulo: u32,
    pub offset: u32,
    #[serde(with = "serde_bytes")]
    pub bloom_bytes: Vec<u8>,
}

impl SyncFilter {
    /// Build a filter describing everything the requester already has
    /// for `(community, meta_name)`, sampled at `(modulo, offset)`. The
    /// bloom filter's membership key is each stored packet's raw wire
    /// bytes, so the responder's "absent from the bloom filter" test is
    /// a content check, not merely a global-time check.
    pub fn build<S: Store>(
        store: &S,
        community: &Cid,
        meta_name: &str,
        low_global_time: u64,
        bits: usize,
        modulo: u32,
        offset: u32,
    ) -> Self {
        let mut bloom = BloomFilter::new(bits, 7);
        for row in store.range(community, meta_name) {
            if row.global_time < low_global_time {
                continue;
            }
            if let Some(raw) = &row.raw {
                bloom.insert(raw);
            }
        }
        Self {
            low_global_time,
            bits,
            modulo,
            offset,
            bloom_bytes: bloom.as_bytes().to_vec(),
        }
    }

    fn bloom(&self) -> BloomFilter {
        BloomFilter::from_bytes(self.bits, 7, self.bloom_bytes.clone())
    }

    /// Whether `global_time` falls on this filter's modulo/offset
    /// sample (spec §4.7, invariant "Sync modulo").
    pub fn samples(&self, global_time: u64) -> bool {
        let modulo = self.modulo.max(1) as u64;
        (global_time + self.offset as u64) % modulo == 0
    }
}

/// Select the rows to send back for an introduction-request carrying
/// `filter`, honouring `limit` (`dispersy_sync_response_limit`, the
/// outbound rate window — spec §4.7). Rows are returned in `order`:
/// `OutOrder` descending, `InOrder` ascending (spec §4.6).
pub fn select_sync_response<S: Store>(
    store: &S,
    community: &Cid,
    meta_name: &str,
    filter: &SyncFilter,
    limit: usize,
    order: Order,
) -> Vec<Message> {
    let bloom = filter.bloom();
    let mut rows: Vec<Message> = store
        .range(community, meta_name)
        .into_iter()
        .filter(|row| row.global_time >= filter.low_global_time)
        .filter(|row| filter.samples(row.global_time))
        .filter(|row| row.raw.as_ref().map(|raw| !bloom.contains(raw)).unwrap_or(true))
        .collect();
    match order {
        Order::InOrder => rows.sort_by_key(|m| m.global_time),
        Order::OutOrder => rows.sort_by(|a, b| b.global_time.cmp(&a.global_time)),
    }
    rows.truncate(limit);
    rows
}

/// `dispersy-missing-proof(member, global_time)` (spec §4.7, §4.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MissingProofRequest {
    pub meta_name: String,
    pub member: Mid,
    pub global_time: u64,
}

/// The local timeline's reply to a missing-proof request: the minimum
/// chain granting the questioned action, per spec §4.4 — "if the action
/// is itself an authorize, the reply contains the authorize that
/// granted it, not the permit".
pub fn answer_missing_proof(timeline: &Timeline, request: &MissingProofRequest) -> Option<crate::message::PacketId> {
    for action in [Action::Authorize, Action::Permit, Action::Revoke, Action::Undo] {
        if let Some(proof) = timeline.minimal_proof(request.member, &request.meta_name, action, request.global_time) {
            return Some(proof);
        }
    }
    None
}

/// `dispersy-missing-message(member, [global_times])`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MissingMessageRequest {
    pub meta_name: String,
    pub member: Mid,
    pub global_times: Vec<u64>,
}

pub fn answer_missing_message<S: Store>(store: &S, community: &Cid, request: &MissingMessageRequest) -> Vec<Message> {
    request
        .global_times
        .iter()
        .filter_map(|gt| store.fetch_by_signer(community, &request.meta_name, request.member, *gt))
        .collect()
}

/// `dispersy-missing-sequence(member, meta, low, high)`.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct MissingSequenceRequest {
    pub meta_name: String,
    pub member: Mid,
    pub low: u64,
    pub high: u64,
}

pub fn answer_missing_sequence<S: Store>(store: &S, community: &Cid, request: &MissingSequenceRequest) -> Vec<Message> {
    store
        .range(community, &request.meta_name)
        .into_iter()
        .filter(|m| m.first_signer() == request.member)
        .filter(|m| m.sequence_number.map(|s| s >= request.low && s <= request.high).unwrap_or(false))
        .collect()
}

/// Merge overlapping/adjacent `(member, meta)`-scoped ranges received
/// within one batch window into the minimal covering set, so each
/// packet is sent at most once (spec §4.7).
pub fn coalesce_missing_sequence_requests(requests: Vec<MissingSequenceRequest>) -> Vec<MissingSequenceRequest> {
    let mut by_key: std::collections::HashMap<(Mid, String), Vec<(u64, u64)>> = std::collections::HashMap::new();
    for r in requests {
        by_key.entry((r.member, r.meta_name.clone())).or_default().push((r.low, r.high));
    }
    let mut merged = Vec::new();
    for ((member, meta_name), mut ranges) in by_key {
        ranges.sort();
        let mut acc: Vec<(u64, u64)> = Vec::new();
        for (low, high) in ranges {
            match acc.last_mut() {
                Some((_, last_high)) if low <= *last_high + 1 => {
                    *last_high = (*last_high).max(high);
                }
                _ => acc.push((low, high)),
            }
        }
        for (low, high) in acc {
            merged.push(MissingSequenceRequest {
                meta_name: meta_name.clone(),
                member,
                low,
                high,
            });
        }
    }
    merged
}

/// `dispersy-missing-identity(mid)`.
pub fn answer_missing_identity<S: Store>(store: &S, mid: Mid) -> Option<Member> {
    store.member(mid)
}

/// An outbound missing-* request tracked in a `Context`'s
/// `RequestCache` while its reply is awaited (spec §5).
#[derive(Clone, Debug)]
pub enum PendingRequest {
    MissingProof(MissingProofRequest),
    MissingSequence(MissingSequenceRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SecurityLevel, Sig};
    use crate::message::Authority;
    use crate::store::memory::MemoryStore;

    fn insert_row(store: &mut MemoryStore, community: Cid, signer: Mid, gt: u64) {
        let msg = Message {
            community,
            meta_name: "m".to_string(),
            global_time: gt,
            sequence_number: None,
            authority: Authority::Member {
                signer,
                sig: Sig(vec![0u8; SecurityLevel::Medium.signature_length()]),
            },
            payload: vec![],
            raw: Some(format!("packet-{}", gt).into_bytes()),
            packet_id: None,
            undone: None,
        };
        store.insert(&community, msg).unwrap();
    }

    #[test]
    fn sync_modulo_selects_exactly_the_matching_global_times() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let signer = kp.public_key().mid();
        let community = Cid::from_bytes(&[1u8; 20]);
        let mut store = MemoryStore::new();
        for gt in 0u64..20 {
            insert_row(&mut store, community, signer, gt);
        }
        let filter = SyncFilter {
            low_global_time: 0,
            bits: 4096,
            modulo: 5,
            offset: 0,
            bloom_bytes: bloom::BloomFilter::new(4096, 7).as_bytes().to_vec(),
        };
        let selected = select_sync_response(&store, &community, "m", &filter, 100, Order::InOrder);
        let times: Vec<u64> = selected.iter().map(|m| m.global_time).collect();
        assert_eq!(times, vec![0, 5, 10, 15]);
    }

    #[test]
    fn out_order_sync_response_is_sorted_descending() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let signer = kp.public_key().mid();
        let community = Cid::from_bytes(&[3u8; 20]);
        let mut store = MemoryStore::new();
        for gt in 0u64..20 {
            insert_row(&mut store, community, signer, gt);
        }
        let filter = SyncFilter {
            low_global_time: 0,
            bits: 4096,
            modulo: 5,
            offset: 0,
            bloom_bytes: bloom::BloomFilter::new(4096, 7).as_bytes().to_vec(),
        };
        let selected = select_sync_response(&store, &community, "m", &filter, 100, Order::OutOrder);
        let times: Vec<u64> = selected.iter().map(|m| m.global_time).collect();
        assert_eq!(times, vec![15, 10, 5, 0]);
    }

    #[test]
    fn bloom_filter_suppresses_already_known_packets() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let signer = kp.public_key().mid();
        let community = Cid::from_bytes(&[2u8; 20]);
        let mut store = MemoryStore::new();
        for gt in 0u64..5 {
            insert_row(&mut store, community, signer, gt);
        }
        let filter = SyncFilter::build(&store, &community, "m", 0, 4096, 1, 0);
        let selected = select_sync_response(&store, &community, "m", &filter, 100, Order::InOrder);
        assert!(selected.is_empty(), "requester already has everything responder has");
    }

    #[test]
    fn missing_sequence_requests_coalesce_adjacent_ranges() {
        let mid = Mid::from_bytes(&[9u8; 20]);
        let requests = vec![
            MissingSequenceRequest { meta_name: "m".to_string(), member: mid, low: 1, high: 3 },
            MissingSequenceRequest { meta_name: "m".to_string(), member: mid, low: 4, high: 6 },
            MissingSequenceRequest { meta_name: "m".to_string(), member: mid, low: 10, high: 12 },
        ];
        let merged = coalesce_missing_sequence_requests(requests);
        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&MissingSequenceRequest { meta_name: "m".to_string(), member: mid, low: 1, high: 6 }));
        assert!(merged.contains(&MissingSequenceRequest { meta_name: "m".to_string(), member: mid, low: 10, high: 12 }));
    }
}
