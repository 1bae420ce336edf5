//! The relay client capability the bus is built on.
//!
//! Implementations wrap a real multiplexed relay client; the bus never
//! reaches past these traits.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::RelayError;

/// What the relay client needs to join the network as one account.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Hex wallet seed.
    pub seed: String,
    /// Address prefix (`<identifier>.<pubkey>`).
    pub identifier: Option<String>,
    pub num_sub_clients: u32,
    pub seed_rpc_servers: Vec<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("seed", &"<redacted>")
            .field("identifier", &self.identifier)
            .field("num_sub_clients", &self.num_sub_clients)
            .field("seed_rpc_servers", &self.seed_rpc_servers)
            .finish()
    }
}

/// Frame body as delivered by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Text(String),
    Binary(Vec<u8>),
}

impl FramePayload {
    /// Binary payloads are read as UTF-8, replacing invalid sequences.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

/// One inbound frame. `source` may carry a `__N__.` sub-link tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    pub source: String,
    pub payload: FramePayload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Do not wait for the recipient's acknowledgment.
    pub no_reply: bool,
    /// How long relay nodes keep the message for an offline recipient.
    pub msg_holding_seconds: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribersQuery {
    pub offset: u32,
    pub limit: u32,
    /// Include subscriptions still in the transaction pool.
    pub tx_pool: bool,
}

impl Default for SubscribersQuery {
    fn default() -> Self {
        Self { offset: 0, limit: 1000, tx_pool: true }
    }
}

/// Subscriber listing; relays answer with either shape.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberSet {
    List(Vec<String>),
    /// Address -> subscription metadata.
    Keyed(BTreeMap<String, serde_json::Value>),
}

impl SubscriberSet {
    pub fn into_addresses(self) -> Vec<String> {
        match self {
            Self::List(addresses) => addresses,
            Self::Keyed(map) => map.into_keys().collect(),
        }
    }
}

/// A constructed relay client plus its two event sources.
pub struct RelayLink {
    pub client: Arc<dyn RelayClient>,
    /// Fires once with the assigned network address.
    pub connected: oneshot::Receiver<String>,
    /// Inbound frames in arrival order; ends when the client goes away.
    pub frames: mpsc::UnboundedReceiver<RelayFrame>,
}

/// Builds relay clients.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Construct a client and start its handshake. Completion is signalled
    /// through [`RelayLink::connected`].
    async fn open(&self, credentials: &Credentials) -> Result<RelayLink, RelayError>;
}

/// Operations on a live relay client.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Send `payload` to every destination. Without `no_reply` the call
    /// resolves once the recipient acknowledged.
    async fn send(
        &self,
        destinations: &[String],
        payload: &str,
        options: SendOptions,
    ) -> Result<(), RelayError>;

    /// Subscribe to `topic` for `duration` blocks. Returns the transaction hash.
    async fn subscribe(&self, topic: &str, duration: u32, fee: &str) -> Result<String, RelayError>;

    /// Returns the transaction hash.
    async fn unsubscribe(&self, topic: &str, fee: &str) -> Result<String, RelayError>;

    async fn get_subscribers(
        &self,
        topic: &str,
        query: SubscribersQuery,
    ) -> Result<SubscriberSet, RelayError>;

    async fn close(&self) -> Result<(), RelayError>;
}
