//! Direct-message admission.
//!
//! Only direct chats are gated; topic and group traffic always passes.

use dchat_wire::{normalize_address, CHANNEL};
use serde::Deserialize;

/// Allow-list entry matching every sender.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Unknown senders get a pairing code and are held until approved.
    #[default]
    Pairing,
    /// Unknown senders are dropped.
    Allowlist,
    Open,
    /// Every direct message is dropped.
    Disabled,
}

impl DmPolicy {
    /// Whether admission depends on the allow list.
    pub fn consults_allow_list(self) -> bool {
        matches!(self, Self::Pairing | Self::Allowlist)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmDecision {
    Allow,
    /// Unknown sender under [`DmPolicy::Pairing`].
    RequestPairing,
    Deny,
}

/// Canonical form of an allow-list entry: trimmed, lowercased, without a
/// `dchat:` prefix or sub-link tag. Returns `None` for blank entries.
pub fn normalize_entry(entry: &str) -> Option<String> {
    let trimmed = entry.trim();
    let unprefixed = trimmed
        .strip_prefix(CHANNEL)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(trimmed);
    let address = normalize_address(unprefixed.trim());
    (!address.is_empty()).then(|| address.to_lowercase())
}

/// Union of the configured and the persisted allow lists, normalized and
/// without duplicates. Configured entries come first.
pub fn merge_allow_from(configured: &[String], stored: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(configured.len() + stored.len());
    for entry in configured.iter().chain(stored) {
        if let Some(entry) = normalize_entry(entry) {
            if !merged.contains(&entry) {
                merged.push(entry);
            }
        }
    }
    merged
}

/// Case-insensitive membership test; `*` admits everyone.
pub fn is_allowed(sender_id: &str, allow_from: &[String]) -> bool {
    let Some(sender) = normalize_entry(sender_id) else {
        return false;
    };
    allow_from.iter().any(|entry| entry == WILDCARD || *entry == sender)
}

/// Decide what happens to a direct message from `sender_id`. `allow_from`
/// must already be merged.
pub fn evaluate_dm(policy: DmPolicy, sender_id: &str, allow_from: &[String]) -> DmDecision {
    match policy {
        DmPolicy::Disabled => DmDecision::Deny,
        DmPolicy::Open => DmDecision::Allow,
        DmPolicy::Allowlist if is_allowed(sender_id, allow_from) => DmDecision::Allow,
        DmPolicy::Allowlist => DmDecision::Deny,
        DmPolicy::Pairing if is_allowed(sender_id, allow_from) => DmDecision::Allow,
        DmPolicy::Pairing => DmDecision::RequestPairing,
    }
}
