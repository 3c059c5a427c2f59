//! Timeline: the per-community permission state machine (design doc
//! component 4.4).
//!
//! The community's master member is the initial root of authority and
//! always holds every permission. Every other grant is recorded as an
//! interval of validity (`[from, to)` in global-time) tagged with the
//! `PacketId` of the `dispersy-authorize` message that granted it;
//! revocation closes the currently-open interval at `global_time + 1`
//! (spec §4.8).

use crate::member::Mid;
use crate::message::PacketId;
use crate::meta_message::Resolution;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The four permission kinds the timeline tracks per `(member,
/// meta-message)` pair (spec §4.4).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Action {
    /// May author ordinary messages of this kind (relevant only under
    /// `Resolution::Linear`).
    Permit,
    /// May grant any of the four actions to other members for this
    /// kind.
    Authorize,
    /// May revoke a previously granted action for this kind.
    Revoke,
    /// May undo other members' messages of this kind.
    Undo,
}

/// The outcome of checking whether a message/action may proceed.
#[derive(Debug, Eq, PartialEq)]
pub enum CheckOutcome {
    /// Proceed to policy evaluation.
    Accept,
    /// The timeline doesn't yet have enough information (no grant
    /// record at all for this member/meta/action); request the proof
    /// from the source and hold the message.
    DelayByProof,
    /// The timeline has enough information to know this is not, and was
    /// never, permitted at the message's global time. Permanent.
    Drop(&'static str),
}

#[derive(Clone, Debug)]
struct Grant {
    from: u64,
    to: Option<u64>,
    proof: PacketId,
}

impl Grant {
    fn covers(&self, at: u64) -> bool {
        at >= self.from && self.to.map(|to| at < to).unwrap_or(true)
    }
}

/// A single `(member, meta-message)` key into the dynamic-settings
/// history: the resolution policy in force, as a function of time.
#[derive(Clone, Debug)]
struct DynamicChange {
    from: u64,
    resolution: Resolution,
    proof: PacketId,
}

/// The per-community permission history.
pub struct Timeline {
    master: Mid,
    grants: HashMap<(Mid, String, Action), Vec<Grant>>,
    dynamic_settings: HashMap<String, Vec<DynamicChange>>,
}

impl Timeline {
    /// A fresh timeline whose only root of authority is the community's
    /// master member.
    pub fn new(master: Mid) -> Self {
        Self {
            master,
            grants: HashMap::new(),
            dynamic_settings: HashMap::new(),
        }
    }

    /// Whether `member` holds `action` for `meta_name` at `at`.
    ///
    /// The master member always holds every action (spec §4.4: "the
    /// community's master-member holds all permissions").
    pub fn check_action(&self, member: Mid, meta_name: &str, action: Action, at: u64) -> CheckOutcome {
        if member == self.master {
            return CheckOutcome::Accept;
        }
        match self.grants.get(&(member, meta_name.to_string(), action)) {
            None => CheckOutcome::DelayByProof,
            Some(grants) => {
                if grants.iter().any(|g| g.covers(at)) {
                    CheckOutcome::Accept
                } else {
                    CheckOutcome::Drop("not authorized at this global time")
                }
            }
        }
    }

    /// Effective resolution policy for `meta_name` at `at`, following
    /// any `dispersy-dynamic-settings` history; falls back to `default`
    /// if no change has ever been recorded.
    pub fn get_resolution_policy(&self, meta_name: &str, at: u64, default: &Resolution) -> Resolution {
        match self.dynamic_settings.get(meta_name) {
            None => default.clone(),
            Some(changes) => changes
                .iter()
                .rev()
                .find(|c| c.from <= at)
                .map(|c| c.resolution.clone())
                .unwrap_or_else(|| default.clone()),
        }
    }

    /// Apply an authorize message: `granter` grants each `(subject,
    /// meta_name, action)` triple effective from `global_time`, proven
    /// by `proof` (the authorize message's own packet id).
    ///
    /// The caller (the batch/community pipeline) must have already
    /// confirmed via `check_action(granter, meta_name, Action::Authorize,
    /// granter_global_time)` that `granter` was allowed to do this.
    pub fn apply_authorize(
        &mut self,
        grants: &[(Mid, String, Action)],
        global_time: u64,
        proof: PacketId,
    ) {
        for (subject, meta_name, action) in grants {
            self.grants
                .entry((*subject, meta_name.clone(), *action))
                .or_default()
                .push(Grant {
                    from: global_time,
                    to: None,
                    proof,
                });
        }
    }

    /// Apply a revoke message: close the currently-open interval for
    /// each `(subject, meta_name, action)` triple at `global_time + 1`
    /// (spec §4.8: "removes a permission prospectively").
    pub fn apply_revoke(&mut self, revokes: &[(Mid, String, Action)], global_time: u64) {
        for (subject, meta_name, action) in revokes {
            if let Some(grants) = self.grants.get_mut(&(*subject, meta_name.clone(), *action)) {
                if let Some(open) = grants.iter_mut().rev().find(|g| g.to.is_none()) {
                    open.to = Some(global_time + 1);
                }
            }
        }
    }

    /// Apply a dynamic-settings message: from `global_time` onward,
    /// `meta_name`'s effective resolution policy becomes `resolution`.
    pub fn apply_dynamic_settings(
        &mut self,
        meta_name: &str,
        resolution: Resolution,
        global_time: u64,
        proof: PacketId,
    ) {
        self.dynamic_settings
            .entry(meta_name.to_string())
            .or_default()
            .push(DynamicChange {
                from: global_time,
                resolution,
                proof,
            });
    }

    /// The minimal proof for `member` holding `action` on `meta_name` at
    /// `at`: the packet id of the exact authorize message that granted
    /// the covering interval. If the questioned action is itself
    /// `Authorize`, this naturally returns the authorize message that
    /// granted *that* authorize permission, not a `Permit` grant (spec
    /// §4.4, §8 "Proof chase").
    pub fn minimal_proof(&self, member: Mid, meta_name: &str, action: Action, at: u64) -> Option<PacketId> {
        if member == self.master {
            return None;
        }
        self.grants
            .get(&(member, meta_name.to_string(), action))?
            .iter()
            .find(|g| g.covers(at))
            .map(|g| g.proof)
    }

    /// This community's root of authority.
    pub fn master(&self) -> Mid {
        self.master
    }
}
