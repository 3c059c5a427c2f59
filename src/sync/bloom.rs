//! A hand-rolled bloom filter backing the sync filter's negative
//! membership test (spec §4.7). No crate in this workspace's dependency
//! stack offers one; double hashing (`h1 + i*h2`) derives the `k`
//! probe positions from the crate's existing `sha2`-based `hash20`.

use sha2::{Digest, Sha256};

/// A fixed-size bloom filter over packet content hashes.
#[derive(Clone, Debug)]
pub struct BloomFilter {
    bits: Vec<u8>,
    m_bits: usize,
    k: u32,
}

fn double_hash(item: &[u8]) -> (u64, u64) {
    let mut h1 = Sha256::new();
    h1.update(b"dispersy-bloom-h1");
    h1.update(item);
    let d1 = h1.finalize();
    let mut h2 = Sha256::new();
    h2.update(b"dispersy-bloom-h2");
    h2.update(item);
    let d2 = h2.finalize();
    (
        u64::from_be_bytes(d1[0..8].try_into().unwrap()),
        u64::from_be_bytes(d2[0..8].try_into().unwrap()) | 1, // odd, so it's coprime with any power-of-two m
    )
}

impl BloomFilter {
    /// A fresh, empty filter of `m_bits` bits using `k` probes.
    pub fn new(m_bits: usize, k: u32) -> Self {
        Self {
            bits: vec![0u8; (m_bits + 7) / 8],
            m_bits: m_bits.max(1),
            k: k.max(1),
        }
    }

    /// Reconstruct a filter received over the wire.
    pub fn from_bytes(m_bits: usize, k: u32, bytes: Vec<u8>) -> Self {
        Self {
            bits: bytes,
            m_bits: m_bits.max(1),
            k: k.max(1),
        }
    }

    /// The filter's wire encoding (`bloom_bytes` in the sync filter).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn insert(&mut self, item: &[u8]) {
        for pos in self.positions(item) {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        self.positions(item).all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    fn positions(&self, item: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let (h1, h2) = double_hash(item);
        let m = self.m_bits as u64;
        (0..self.k).map(move |i| (h1.wrapping_add((i as u64).wrapping_mul(h2)) % m) as usize)
    }
}
