//! One account's lifetime: connect, subscribe, pump inbound frames, and
//! reconnect with backoff until cancelled.

use std::sync::Arc;
use std::time::Duration;

use dchat_bus::{Bus, BusError, InboundFrame};
use dchat_wire::{
    decode_inbound, encode_outbound_text, encode_receipt, gen_topic_hash, normalize_address,
    parse_envelope, ChatType, DedupCache, Decoded, InboundMessage, OutboundTarget,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::collab::{InboundContext, PairingStore, ReplyDispatcher};
use crate::config::AccountConfig;
use crate::error::CollaboratorError;
use crate::gateway::Collaborators;
use crate::outbound::{ReplyRoute, ReplySink};
use crate::policy::{evaluate_dm, merge_allow_from, DmDecision};

/// Drives one account. The session exclusively owns its bus and dedup
/// cache; neither outlives [`AccountSession::run`].
pub struct AccountSession {
    inbound: Arc<Inbound>,
}

/// Per-frame pipeline state, shared with the frame tasks.
struct Inbound {
    account_id: String,
    config: AccountConfig,
    bus: Arc<Bus>,
    dedup: DedupCache,
    pairing: Arc<dyn PairingStore>,
    dispatcher: Arc<dyn ReplyDispatcher>,
}

impl AccountSession {
    pub fn new(account_id: &str, config: AccountConfig, collaborators: &Collaborators) -> Self {
        let bus = Arc::new(Bus::new(account_id, collaborators.connector.clone()));
        Self {
            inbound: Arc::new(Inbound {
                account_id: account_id.to_string(),
                config,
                bus,
                dedup: DedupCache::default(),
                pairing: collaborators.pairing.clone(),
                dispatcher: collaborators.dispatcher.clone(),
            }),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.inbound.account_id
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.inbound.bus
    }

    /// Run until `cancel` fires. Connect failures and link loss are retried
    /// with exponential backoff; the bus is disconnected on every exit path.
    pub async fn run(self, cancel: CancellationToken) {
        let inbound = self.inbound;
        let account_id = inbound.account_id.clone();
        let bus = inbound.bus.clone();
        let Some(mut frames) = bus.take_frames().await else {
            log::error!("dchat({account_id}): frame stream already taken");
            return;
        };

        let credentials = inbound.config.credentials();
        let initial_delay = inbound.config.reconnect_initial_delay();
        let max_delay = inbound.config.reconnect_max_delay();
        let mut delay = initial_delay;
        let mut tasks: JoinSet<()> = JoinSet::new();

        log::info!("dchat({account_id}): session starting");
        'session: loop {
            match bus.connect(&credentials, &cancel).await {
                Ok(address) => {
                    log::info!("dchat({account_id}): online as {address}");
                    delay = initial_delay;
                    inbound.subscribe_topics(&cancel).await;

                    let lost = bus.link_lost();
                    tokio::pin!(lost);
                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break 'session,
                            _ = &mut lost => {
                                log::warn!("dchat({account_id}): relay link lost");
                                bus.disconnect().await;
                                break;
                            }
                            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                                if let Err(err) = joined {
                                    if err.is_panic() {
                                        log::error!("dchat({account_id}): frame handler panicked");
                                    }
                                }
                            }
                            Some(frame) = frames.recv() => {
                                let inbound = inbound.clone();
                                tasks.spawn(async move { inbound.handle_frame(frame).await });
                            }
                        }
                    }
                }
                Err(BusError::Cancelled) => break,
                Err(err) => log::warn!("dchat({account_id}): connect failed: {err}"),
            }

            if cancel.is_cancelled() {
                break;
            }
            log::info!("dchat({account_id}): reconnecting in {}ms", delay.as_millis());
            if !bus.wait_reconnect(delay, &cancel).await && cancel.is_cancelled() {
                break;
            }
            delay = next_delay(delay, max_delay);
        }

        tasks.abort_all();
        bus.disconnect().await;
        log::info!("dchat({account_id}): session stopped");
    }
}

fn next_delay(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

impl Inbound {
    async fn subscribe_topics(&self, cancel: &CancellationToken) {
        for topic in &self.config.topics {
            let hash = gen_topic_hash(topic);
            let subscribed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                subscribed = self.bus.subscribe(
                    &hash,
                    self.config.subscribe_duration,
                    &self.config.subscribe_fee,
                ) => subscribed,
            };
            if let Err(err) = subscribed {
                log::warn!("dchat({}): subscribe {topic} failed: {err}", self.account_id);
            }
        }
    }

    async fn handle_frame(&self, frame: InboundFrame) {
        if let Err(err) = self.process(frame).await {
            log::warn!("dchat({}): inbound handling failed: {err}", self.account_id);
        }
    }

    async fn process(&self, frame: InboundFrame) -> Result<(), CollaboratorError> {
        let sender = normalize_address(&frame.source);
        let Some(envelope) = parse_envelope(&frame.text) else {
            log::debug!("dchat({}): dropping malformed frame from {sender}", self.account_id);
            return Ok(());
        };
        if self.dedup.check_and_mark(&envelope.id) {
            log::trace!("dchat({}): duplicate {}", self.account_id, envelope.id);
            return Ok(());
        }

        let self_address = self.bus.address().await.unwrap_or_default();
        let account = Some(self.account_id.as_str());
        let message = match decode_inbound(sender, &envelope, &self_address, account) {
            Decoded::Displayable(message) => message,
            Decoded::Control | Decoded::Malformed => {
                log::trace!(
                    "dchat({}): control {} from {sender}",
                    self.account_id,
                    envelope.content_type.as_str()
                );
                return Ok(());
            }
        };

        self.send_receipt(sender, &envelope.id).await;

        if message.chat_type == ChatType::Direct && !self.admit_direct(&message).await? {
            return Ok(());
        }

        let Some(route) = ReplyRoute::from_session_key(&message.session_key, &message.sender_id)
        else {
            log::warn!("dchat({}): unroutable session {}", self.account_id, message.session_key);
            return Ok(());
        };
        let replies =
            ReplySink::new(&self.account_id, self.bus.clone(), route, self.config.text_chunk_limit);
        let context = InboundContext { account_id: self.account_id.clone(), message };
        self.dispatcher.dispatch(context, replies).await
    }

    async fn send_receipt(&self, sender: &str, message_id: &str) {
        let payload = match serde_json::to_string(&encode_receipt(message_id)) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("dchat({}): encode receipt failed: {err}", self.account_id);
                return;
            }
        };
        if let Err(err) = self.bus.send_fire_and_forget(sender, &payload).await {
            log::warn!("dchat({}): receipt to {sender} failed: {err}", self.account_id);
        }
    }

    /// Returns `false` when the direct message must be dropped.
    async fn admit_direct(&self, message: &InboundMessage) -> Result<bool, CollaboratorError> {
        let policy = self.config.dm_policy;
        let stored = if policy.consults_allow_list() {
            match self.pairing.read_allow_from(&self.account_id).await {
                Ok(stored) => stored,
                Err(err) => {
                    log::warn!("dchat({}): reading allow list failed: {err}", self.account_id);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let allow_from = merge_allow_from(&self.config.allow_from, &stored);

        match evaluate_dm(policy, &message.sender_id, &allow_from) {
            DmDecision::Allow => Ok(true),
            DmDecision::Deny => {
                log::debug!(
                    "dchat({}): {:?} policy dropped dm from {}",
                    self.account_id,
                    policy,
                    message.sender_id
                );
                Ok(false)
            }
            DmDecision::RequestPairing => {
                let request = self
                    .pairing
                    .upsert_pairing_request(&self.account_id, &message.sender_id)
                    .await?;
                if request.created {
                    self.send_pairing_reply(&message.sender_id, &request.code).await;
                }
                log::info!(
                    "dchat({}): pairing requested by {} (new={})",
                    self.account_id,
                    message.sender_id,
                    request.created
                );
                Ok(false)
            }
        }
    }

    async fn send_pairing_reply(&self, sender_id: &str, code: &str) {
        let text = self.pairing.build_pairing_reply(sender_id, code);
        let envelope = encode_outbound_text(&text, &OutboundTarget::default());
        let sent = match serde_json::to_string(&envelope) {
            Ok(payload) => self.bus.send(sender_id, &payload).await.map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        if let Err(err) = sent {
            log::warn!("dchat({}): pairing reply to {sender_id} failed: {err}", self.account_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let max = Duration::from_millis(5000);
        let mut delay = Duration::from_millis(1000);
        let mut seen = Vec::new();
        for _ in 0..5 {
            delay = next_delay(delay, max);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, vec![2000, 4000, 5000, 5000, 5000]);
    }
}
