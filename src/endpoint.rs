//! Endpoint: the narrow seam between the core and the transport (design
//! doc §9 "UDP transport"). `send`/`packets_in` let tests and the
//! launcher drive the same `Context` pipeline without committing this
//! crate to a concrete network stack; a real UDP socket implementation
//! is an outer layer the launcher binary wires in.

use crate::member::Mid;

/// Where to address an outbound packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Destination {
    /// A specific known candidate.
    Candidate(Mid),
    /// Broadcast/gossip to the community's current candidate set.
    Community,
}

/// The transport seam a `Context` sends through and receives from.
pub trait Endpoint {
    /// Queue `bytes` for delivery to `destination`. Implementations may
    /// batch, drop, or reorder at their discretion; the core only relies
    /// on eventual, not guaranteed, delivery (spec's gossip model).
    fn send(&mut self, destination: Destination, bytes: Vec<u8>);

    /// Drain whatever packets have arrived since the last call, each
    /// tagged with its meta-message marker byte as `on_incoming_packets`
    /// expects.
    fn drain_incoming(&mut self) -> Vec<(u8, Vec<u8>)>;
}

/// An in-process `Endpoint` with no transport at all: `send` appends to
/// an outbox, and tests feed `deliver` to simulate arrivals. Used by
/// integration tests exercising two or more peers in one process and by
/// any community configured to run fully offline.
#[derive(Default)]
pub struct OfflineEndpoint {
    outbox: Vec<(Destination, Vec<u8>)>,
    inbox: Vec<(u8, Vec<u8>)>,
}

impl OfflineEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the arrival of a packet tagged with `marker`.
    pub fn deliver(&mut self, marker: u8, bytes: Vec<u8>) {
        self.inbox.push((marker, bytes));
    }

    /// Drain everything queued by `send` since the last call.
    pub fn drain_outbox(&mut self) -> Vec<(Destination, Vec<u8>)> {
        std::mem::take(&mut self.outbox)
    }
}

impl Endpoint for OfflineEndpoint {
    fn send(&mut self, destination: Destination, bytes: Vec<u8>) {
        self.outbox.push((destination, bytes));
    }

    fn drain_incoming(&mut self) -> Vec<(u8, Vec<u8>)> {
        std::mem::take(&mut self.inbox)
    }
}
