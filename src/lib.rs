//! Epidemic message-dissemination substrate for overlays called
//! *communities*: batching and deduplication of incoming packets, the
//! authorization timeline, per-message distribution policies, the
//! undo/revoke engine, bloom-filter anti-entropy, and the identity and
//! permission proof-chase, for a single peer (see `DESIGN.md`).

pub mod batch;
pub mod codec;
pub mod community;
pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod member;
pub mod message;
pub mod meta_message;
pub mod permission;
pub mod store;
pub mod sync;
pub mod timeline;
pub mod undo;

pub use community::{Cid, Community, Context};
pub use error::{Error, Result};
pub use member::{Member, Mid};
pub use message::Message;
pub use meta_message::MetaMessage;
