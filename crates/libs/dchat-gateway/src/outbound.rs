//! Routing replies back onto the relay.

use std::sync::Arc;

use dchat_bus::Bus;
use dchat_wire::{
    dm_address_of, encode_outbound_text, gen_topic_hash, group_id_of, normalize_address,
    topic_of, OutboundTarget,
};

use crate::error::DeliveryError;

/// Where replies to one conversation go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyRoute {
    /// Acknowledged send to one address.
    Direct(String),
    /// Fan-out to every subscriber of the topic except ourselves.
    Topic(String),
    /// Private-group reply sent back to the member it came from.
    Group { group_id: String, via: String },
}

impl ReplyRoute {
    /// Derive the route from a conversation key. `sender_id` is the peer the
    /// triggering message came from.
    pub fn from_session_key(session_key: &str, sender_id: &str) -> Option<Self> {
        if let Some(topic) = topic_of(session_key) {
            return Some(Self::Topic(topic));
        }
        if let Some(group_id) = group_id_of(session_key) {
            return Some(Self::Group { group_id, via: sender_id.to_string() });
        }
        dm_address_of(session_key).map(Self::Direct)
    }

    fn target(&self) -> OutboundTarget {
        match self {
            Self::Direct(_) => OutboundTarget::default(),
            Self::Topic(topic) => OutboundTarget { topic: Some(topic.clone()), group_id: None },
            Self::Group { group_id, .. } => {
                OutboundTarget { topic: None, group_id: Some(group_id.clone()) }
            }
        }
    }
}

/// Split `text` into pieces of at most `limit` characters, cutting at the
/// last newline in the window, else the last whitespace, else hard.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > limit {
        let window_end = rest.char_indices().nth(limit).map_or(rest.len(), |(index, _)| index);
        let window = &rest[..window_end];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(char::is_whitespace))
            .filter(|&index| index > 0)
            .unwrap_or(window_end);
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Sends replies for one inbound message.
#[derive(Clone)]
pub struct ReplySink {
    account_id: String,
    bus: Arc<Bus>,
    route: ReplyRoute,
    chunk_limit: usize,
}

impl ReplySink {
    pub fn new(account_id: &str, bus: Arc<Bus>, route: ReplyRoute, chunk_limit: usize) -> Self {
        Self { account_id: account_id.to_string(), bus, route, chunk_limit }
    }

    pub fn route(&self) -> &ReplyRoute {
        &self.route
    }

    /// Deliver `text`, chunked. Blank text sends nothing.
    pub async fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let chunks = chunk_text(text, self.chunk_limit);
        let target = self.route.target();

        match &self.route {
            ReplyRoute::Direct(address) => {
                for chunk in &chunks {
                    let payload = serde_json::to_string(&encode_outbound_text(chunk, &target))?;
                    self.bus.send(address, &payload).await?;
                }
            }
            ReplyRoute::Topic(topic) => {
                let destinations = self.topic_destinations(topic).await?;
                if destinations.is_empty() {
                    log::debug!("dchat({}): no subscribers on #{topic}", self.account_id);
                }
                for chunk in &chunks {
                    let payload = serde_json::to_string(&encode_outbound_text(chunk, &target))?;
                    self.bus.send_to_many(&destinations, &payload).await?;
                }
            }
            ReplyRoute::Group { via, .. } => {
                for chunk in &chunks {
                    let payload = serde_json::to_string(&encode_outbound_text(chunk, &target))?;
                    self.bus.send_fire_and_forget(via, &payload).await?;
                }
            }
        }
        log::debug!(
            "dchat({}): delivered {} chunk(s) via {:?}",
            self.account_id,
            chunks.len(),
            self.route
        );
        Ok(())
    }

    async fn topic_destinations(&self, topic: &str) -> Result<Vec<String>, DeliveryError> {
        let subscribers = self.bus.list_subscribers(&gen_topic_hash(topic)).await?;
        let own = self.bus.address().await.unwrap_or_default();
        let own = normalize_address(&own);
        Ok(subscribers
            .into_iter()
            .filter(|address| own.is_empty() || normalize_address(address) != own)
            .collect())
    }
}
