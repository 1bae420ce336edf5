//! Seams to the host runtime.

use async_trait::async_trait;
use dchat_wire::InboundMessage;

use crate::error::CollaboratorError;
use crate::outbound::ReplySink;

/// Outcome of recording a pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    pub code: String,
    /// `false` when a request for this sender was already pending.
    pub created: bool,
}

/// Persistent pairing state, owned by the host.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Senders approved through pairing, for `account_id`.
    async fn read_allow_from(&self, account_id: &str) -> Result<Vec<String>, CollaboratorError>;

    async fn upsert_pairing_request(
        &self,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairingRequest, CollaboratorError>;

    /// Text sent back to a sender that has to pair first.
    fn build_pairing_reply(&self, sender_id: &str, code: &str) -> String;
}

/// One admitted message handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundContext {
    pub account_id: String,
    pub message: InboundMessage,
}

/// Receives admitted messages. Replies go out through the [`ReplySink`],
/// which already knows where to route them.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        context: InboundContext,
        replies: ReplySink,
    ) -> Result<(), CollaboratorError>;
}
