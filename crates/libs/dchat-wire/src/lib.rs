//! # dchat-wire
//!
//! Wire format and inbound plumbing for the dchat relay bridge.
//!
//! dchat clients exchange JSON envelopes over a multiplexed relay network.
//! This crate translates those envelopes to and from the bridge's message
//! model without touching the network:
//!
//! - [`envelope`]: the JSON envelope and its content types
//! - [`codec`]: inbound classification/decoding and outbound encoding
//! - [`session`]: durable session keys (`dchat:[account:]dm:<addr>`, ...)
//! - [`topic`]: topic channel hashes
//! - [`dedup`]: bounded recency set used to drop fan-out duplicates
//!
//! ## Example
//!
//! ```rust
//! use dchat_wire::{codec, Decoded};
//!
//! let envelope = codec::encode_outbound_text("hello", &Default::default());
//! let raw = serde_json::to_string(&envelope).unwrap();
//! let parsed = codec::parse_envelope(&raw).unwrap();
//! match codec::decode_inbound("peer", &parsed, "self", None) {
//!     Decoded::Displayable(msg) => assert_eq!(msg.session_key, "dchat:dm:peer"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

pub mod codec;
pub mod dedup;
pub mod envelope;
pub mod session;
pub mod topic;

pub use codec::{
    classify, decode_inbound, encode_outbound_text, encode_receipt, normalize_address,
    parse_envelope, ChatType, Decoded, InboundMessage, OutboundTarget,
};
pub use dedup::DedupCache;
pub use envelope::{ContentType, Envelope, MediaKind, MediaOptions};
pub use session::{dm_address_of, group_id_of, topic_of, SessionKey, SessionTarget};
pub use topic::gen_topic_hash;

/// Channel tag used as the session key prefix and topic hash prefix.
pub const CHANNEL: &str = "dchat";

/// Account id whose session keys omit the account segment.
pub const DEFAULT_ACCOUNT_ID: &str = "default";
