//! Session keys.
//!
//! A session key names one conversation thread and is persisted by the host,
//! so the shape is durable:
//!
//! ```text
//! dchat:dm:<address>             direct chat, default account
//! dchat:<account>:dm:<address>   direct chat, any other account
//! dchat:topic:<name>             public topic
//! dchat:group:<id>               private group
//! ```
//!
//! Only DM keys are account scoped: two accounts talking to the same peer
//! must not share a thread.

use std::fmt;

use crate::{CHANNEL, DEFAULT_ACCOUNT_ID};

const DM: &str = "dm";
const TOPIC: &str = "topic";
const GROUP: &str = "group";

/// Key kinds that can never be used as an account id.
pub const RESERVED_KINDS: [&str; 3] = [DM, TOPIC, GROUP];

/// What a session key points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionTarget {
    Direct(String),
    Topic(String),
    Group(String),
}

/// A parsed (or to-be-rendered) session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// `None` for the default account and for topic/group keys.
    pub account_id: Option<String>,
    pub target: SessionTarget,
}

impl SessionKey {
    /// Build the key for `target` as seen by `account_id`.
    pub fn new(account_id: Option<&str>, target: SessionTarget) -> Self {
        let account_id = match (&target, account_id) {
            (SessionTarget::Direct(_), Some(account)) if account != DEFAULT_ACCOUNT_ID => {
                Some(account.to_string())
            }
            _ => None,
        };
        Self { account_id, target }
    }

    pub fn direct(account_id: Option<&str>, address: &str) -> Self {
        Self::new(account_id, SessionTarget::Direct(address.to_string()))
    }

    pub fn topic(name: &str) -> Self {
        Self::new(None, SessionTarget::Topic(name.to_string()))
    }

    pub fn group(group_id: &str) -> Self {
        Self::new(None, SessionTarget::Group(group_id.to_string()))
    }

    /// Parse a key produced by [`SessionKey::to_string`].
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(CHANNEL)?.strip_prefix(':')?;

        if let Some(address) = rest.strip_prefix("dm:") {
            return Some(Self { account_id: None, target: SessionTarget::Direct(address.into()) });
        }
        if let Some(name) = rest.strip_prefix("topic:") {
            return Some(Self { account_id: None, target: SessionTarget::Topic(name.into()) });
        }
        if let Some(group_id) = rest.strip_prefix("group:") {
            return Some(Self { account_id: None, target: SessionTarget::Group(group_id.into()) });
        }

        let (account, tail) = rest.split_once(':')?;
        let address = tail.strip_prefix("dm:")?;
        if account.is_empty() {
            return None;
        }
        Some(Self {
            account_id: Some(account.to_string()),
            target: SessionTarget::Direct(address.to_string()),
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.account_id, &self.target) {
            (Some(account), SessionTarget::Direct(address)) => {
                write!(f, "{CHANNEL}:{account}:{DM}:{address}")
            }
            (None, SessionTarget::Direct(address)) => write!(f, "{CHANNEL}:{DM}:{address}"),
            (_, SessionTarget::Topic(name)) => write!(f, "{CHANNEL}:{TOPIC}:{name}"),
            (_, SessionTarget::Group(group_id)) => write!(f, "{CHANNEL}:{GROUP}:{group_id}"),
        }
    }
}

/// Topic name embedded in a `dchat:topic:<name>` key.
pub fn topic_of(key: &str) -> Option<String> {
    match SessionKey::parse(key)?.target {
        SessionTarget::Topic(name) => Some(name),
        _ => None,
    }
}

/// Group id embedded in a `dchat:group:<id>` key.
pub fn group_id_of(key: &str) -> Option<String> {
    match SessionKey::parse(key)?.target {
        SessionTarget::Group(group_id) => Some(group_id),
        _ => None,
    }
}

/// Peer address embedded in a scoped or unscoped DM key.
pub fn dm_address_of(key: &str) -> Option<String> {
    match SessionKey::parse(key)?.target {
        SessionTarget::Direct(address) => Some(address),
        _ => None,
    }
}
