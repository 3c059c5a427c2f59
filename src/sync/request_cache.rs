//! Request cache: tracks locally-issued requests (double-sign,
//! introduction, missing-*) awaiting a matching response, and expires
//! them after a bounded wait (spec §5 "Timeouts on outstanding
//! requests... release request-cache entries and invoke the registered
//! on-timeout callback exactly once").
//!
//! Grounded on the identifier-keyed cache/timeout contract exercised by
//! the original implementation's request-cache tests: claim a slot,
//! get back an opaque identifier to embed in the outgoing request, pop
//! it by that identifier when the matching response arrives, and sweep
//! expired entries on a timer.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub type Identifier = u64;

struct Entry<T> {
    value: T,
    deadline: Instant,
}

/// A keyed cache of in-flight requests of type `T`.
pub struct RequestCache<T> {
    entries: HashMap<Identifier, Entry<T>>,
    next_id: Identifier,
}

impl<T> Default for RequestCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<T> RequestCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a fresh identifier for `value`, expiring after `timeout`
    /// (measured from `now`).
    pub fn claim(&mut self, value: T, timeout: Duration, now: Instant) -> Identifier {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let _ = self.entries.insert(
            id,
            Entry {
                value,
                deadline: now + timeout,
            },
        );
        id
    }

    /// Remove and return the entry for `id`, if a response matched it
    /// before expiry.
    pub fn pop(&mut self, id: Identifier) -> Option<T> {
        self.entries.remove(&id).map(|e| e.value)
    }

    /// Whether `id` is still outstanding.
    pub fn contains(&self, id: Identifier) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove and return every entry whose deadline has passed as of
    /// `now`, for the caller to invoke each one's on-timeout callback
    /// exactly once.
    pub fn expire(&mut self, now: Instant) -> Vec<(Identifier, T)> {
        let expired_ids: Vec<Identifier> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| (id, e.value)))
            .collect()
    }

    /// Number of outstanding (not yet popped or expired) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
