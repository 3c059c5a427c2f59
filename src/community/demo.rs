//! A minimal built-in community: registers the system meta-messages
//! every community needs (authorize/revoke/dynamic-settings,
//! undo-own/undo-other, the four missing-* requests) plus one
//! application-level `"text"` message, so `dispersy_node` has something
//! to run without requiring a real plugin-loading mechanism.

use crate::crypto::SecurityLevel;
use crate::member::Member;
use crate::meta_message::{
    Authentication, BatchConfiguration, Destination, Distribution, MetaMessage, Order, Resolution,
};
use crate::{permission, sync, undo};
use std::time::Duration;

use super::{Cid, Community};

/// Build the demo community rooted at `master`, with `my_member` as this
/// peer's local identity.
pub fn build(master: Cid, my_member: Member) -> Community {
    let mut community = Community::new(master, my_member, "demo");

    community.register_meta_message(MetaMessage::new(
        permission::AUTHORIZE,
        Authentication::Member(SecurityLevel::Medium),
        Resolution::Public,
        Distribution::FullSync {
            order: Order::InOrder,
            sequenced: false,
        },
        Destination::Community,
        BatchConfiguration::default(),
    ));
    community.register_meta_message(MetaMessage::new(
        permission::REVOKE,
        Authentication::Member(SecurityLevel::Medium),
        Resolution::Public,
        Distribution::FullSync {
            order: Order::InOrder,
            sequenced: false,
        },
        Destination::Community,
        BatchConfiguration::default(),
    ));
    community.register_meta_message(MetaMessage::new(
        permission::DYNAMIC_SETTINGS,
        Authentication::Member(SecurityLevel::Medium),
        Resolution::Public,
        Distribution::FullSync {
            order: Order::InOrder,
            sequenced: false,
        },
        Destination::Community,
        BatchConfiguration::default(),
    ));
    community.register_meta_message(MetaMessage::new(
        undo::UNDO_OWN,
        Authentication::Member(SecurityLevel::Medium),
        Resolution::Public,
        Distribution::FullSync {
            order: Order::InOrder,
            sequenced: false,
        },
        Destination::Community,
        BatchConfiguration::default(),
    ));
    community.register_meta_message(MetaMessage::new(
        undo::UNDO_OTHER,
        Authentication::Member(SecurityLevel::Medium),
        Resolution::Public,
        Distribution::FullSync {
            order: Order::InOrder,
            sequenced: false,
        },
        Destination::Community,
        BatchConfiguration::default(),
    ));

    for name in [
        sync::INTRODUCTION_REQUEST,
        sync::INTRODUCTION_RESPONSE,
        sync::MISSING_PROOF,
        sync::MISSING_MESSAGE,
        sync::MISSING_SEQUENCE,
        sync::MISSING_IDENTITY,
    ] {
        community.register_meta_message(MetaMessage::new(
            name,
            Authentication::Member(SecurityLevel::Medium),
            Resolution::Public,
            Distribution::FullSync {
                order: Order::InOrder,
                sequenced: false,
            },
            Destination::Candidate,
            BatchConfiguration::new(Duration::from_millis(100), 10),
        ));
    }

    community.register_meta_message(MetaMessage::new(
        "text",
        Authentication::Member(SecurityLevel::Medium),
        Resolution::Linear,
        Distribution::FullSync {
            order: Order::InOrder,
            sequenced: true,
        },
        Destination::Community,
        BatchConfiguration::default(),
    ));

    community
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn demo_registers_every_system_message_and_a_text_kind() {
        let kp = KeyPair::generate(SecurityLevel::Medium);
        let member = Member::new(kp.public_key());
        let community = build(member.mid(), member);

        for name in [
            permission::AUTHORIZE,
            permission::REVOKE,
            permission::DYNAMIC_SETTINGS,
            undo::UNDO_OWN,
            undo::UNDO_OTHER,
            "text",
        ] {
            assert!(community.meta_message(name).is_some(), "missing {}", name);
            assert!(community.meta_marker(name).is_some());
        }
    }
}
