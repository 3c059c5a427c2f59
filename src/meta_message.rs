//! Meta-message: the per-kind descriptor (data model §3).
//!
//! A `MetaMessage` names one message kind in a community's catalogue and
//! carries the four independently-chosen policy variants (authentication,
//! resolution, distribution, destination) plus batch configuration and an
//! optional undo callback — a tagged-variant record rather than an
//! inheritance chain, per the design notes (§9).

use crate::crypto::SecurityLevel;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Who must sign a message of this kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Authentication {
    /// Signed by exactly one member.
    Member(SecurityLevel),
    /// Signed by exactly two members (`sigA` the first signer's,
    /// `sigB` the co-signer's — spec §4.2).
    DoubleMember(SecurityLevel),
}

/// Who may currently author messages of this kind.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// Anyone may author; the timeline only tracks authorize/revoke for
    /// bookkeeping, not enforcement.
    Public,
    /// Only members holding an explicit `permit` at the message's
    /// global time may author.
    Linear,
    /// The effective policy (`Public` or `Linear`) is itself a function
    /// of global time, set by `dispersy-dynamic-settings` messages
    /// (spec §4.8). Carries the policy in force before any such message
    /// has been seen.
    Dynamic(Box<Resolution>),
}

/// Ordering in which a full-sync meta-message's stored rows are
/// delivered to handlers and returned to sync requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    /// Ascending global time.
    InOrder,
    /// Descending global time.
    OutOrder,
}

/// Retention and ordering policy (spec §4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Distribution {
    /// Keep every accepted message indefinitely.
    FullSync {
        /// Delivery/sync order.
        order: Order,
        /// Whether (member, meta-message) pairs carry a dense sequence
        /// number enforced on arrival (spec §4.6 "Sequence-numbered").
        sequenced: bool,
    },
    /// Keep at most `n` rows per authoring key (single- or
    /// double-member, per `double_member`).
    LastN {
        /// Window size.
        n: u32,
        /// Whether the uniqueness/window key is the ordered pair of
        /// co-signers rather than the single author.
        double_member: bool,
    },
}

/// Where a message is addressed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Destination {
    /// Broadcast to the community via gossip/sync.
    Community,
    /// Addressed to a specific candidate only (not synchronised).
    Candidate,
}

/// Per-meta-message batching window (spec §4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchConfiguration {
    /// Oldest packet in an open batch may wait at most this long.
    pub max_window: Duration,
    /// Flush once the open batch reaches this many packets.
    pub max_size: usize,
}

impl BatchConfiguration {
    /// A reasonable default: half a second, 100 packets.
    pub fn new(max_window: Duration, max_size: usize) -> Self {
        Self {
            max_window,
            max_size,
        }
    }
}

impl Default for BatchConfiguration {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 100)
    }
}

/// Invoked once per applied undo, with the message it targets.
pub type UndoCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// The descriptor for one message kind in a community's catalogue.
#[derive(Clone)]
pub struct MetaMessage {
    /// Unique name within the community, e.g. `"dispersy-authorize"`.
    pub name: String,
    pub authentication: Authentication,
    pub resolution: Resolution,
    pub distribution: Distribution,
    pub destination: Destination,
    pub batch: BatchConfiguration,
    /// Invoked once when a message of this kind is marked undone.
    pub undo_callback: Option<UndoCallback>,
}

impl fmt::Debug for MetaMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaMessage")
            .field("name", &self.name)
            .field("authentication", &self.authentication)
            .field("resolution", &self.resolution)
            .field("distribution", &self.distribution)
            .field("destination", &self.destination)
            .field("batch", &self.batch)
            .finish()
    }
}

impl MetaMessage {
    /// Build a meta-message with no undo callback.
    pub fn new(
        name: impl Into<String>,
        authentication: Authentication,
        resolution: Resolution,
        distribution: Distribution,
        destination: Destination,
        batch: BatchConfiguration,
    ) -> Self {
        Self {
            name: name.into(),
            authentication,
            resolution,
            distribution,
            destination,
            batch,
            undo_callback: None,
        }
    }

    /// Attach an undo callback.
    pub fn with_undo_callback(mut self, cb: UndoCallback) -> Self {
        self.undo_callback = Some(cb);
        self
    }

    /// Whether this meta-message's distribution keys on an ordered pair
    /// of co-signers rather than a single member.
    pub fn is_double_member_keyed(&self) -> bool {
        matches!(
            self.distribution,
            Distribution::LastN {
                double_member: true,
                ..
            }
        )
    }

    /// Whether this meta-message enforces a dense per-member sequence.
    pub fn is_sequenced(&self) -> bool {
        matches!(
            self.distribution,
            Distribution::FullSync {
                sequenced: true,
                ..
            }
        )
    }
}
