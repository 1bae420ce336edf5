//! Topic channel hashes.
//!
//! dchat clients subscribe to `dchat` + hex(SHA-1(name)) on the relay's
//! subscription ledger. The digest has to match theirs byte for byte or the
//! bridge would sit in a channel of its own.

use sha1::{Digest, Sha1};

use crate::CHANNEL;

/// Hash a topic name into its relay channel id.
///
/// Leading `#` characters are stripped; nothing else is normalized, so
/// `General` and `general` are different topics.
pub fn gen_topic_hash(name: &str) -> String {
    let cleaned = name.trim_start_matches('#');
    let digest = Sha1::digest(cleaned.as_bytes());
    format!("{CHANNEL}{}", hex::encode(digest))
}
