//! In-memory stand-ins for the relay network and host collaborators.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dchat_bus::{
    Credentials, FramePayload, RelayClient, RelayConnector, RelayError, RelayFrame, RelayLink,
    SendOptions, SubscriberSet, SubscribersQuery,
};
use dchat_gateway::{
    CollaboratorError, InboundContext, PairingRequest, PairingStore, ReplyDispatcher, ReplySink,
};
use tokio::sync::{mpsc, oneshot};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `condition` every 10ms for up to five seconds (virtual time under a
/// paused clock). Returns whether it became true.
pub async fn eventually<F>(condition: F) -> bool
where
    F: FnMut() -> bool,
{
    eventually_within(Duration::from_secs(5), condition).await
}

/// [`eventually`] with an explicit deadline.
pub async fn eventually_within<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Text envelope JSON as a peer client would send it.
pub fn text_envelope(id: &str, content: &str) -> String {
    serde_json::json!({
        "id": id,
        "contentType": "text",
        "content": content,
        "timestamp": 1_700_000_000_000_i64,
    })
    .to_string()
}

/// Like [`text_envelope`], posted to a topic.
pub fn topic_envelope(id: &str, topic: &str, content: &str) -> String {
    serde_json::json!({
        "id": id,
        "contentType": "text",
        "content": content,
        "topic": topic,
        "timestamp": 1_700_000_000_000_i64,
    })
    .to_string()
}

/// Like [`text_envelope`], posted to a private group.
pub fn group_envelope(id: &str, group_id: &str, content: &str) -> String {
    serde_json::json!({
        "id": id,
        "contentType": "text",
        "content": content,
        "groupId": group_id,
        "timestamp": 1_700_000_000_000_i64,
    })
    .to_string()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("test-support state poisoned")
}

/// How [`MockRelay`] answers `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Report the address right away.
    Immediate,
    /// Wait for [`MockRelay::complete_connect`].
    Hold,
    /// Fail `open` with this message.
    Fail(String),
}

/// One `send` call observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub destinations: Vec<String>,
    pub payload: String,
    pub options: SendOptions,
}

impl SentFrame {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).expect("sent payload is JSON")
    }

    pub fn content_type(&self) -> Option<String> {
        self.json().get("contentType").and_then(|value| value.as_str()).map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub duration: u32,
    pub fee: String,
}

struct RelayState {
    address: String,
    behavior: ConnectBehavior,
    failing_opens: usize,
    generation: u64,
    pending_connect: Option<oneshot::Sender<String>>,
    // Live frame streams by link generation.
    links: BTreeMap<u64, mpsc::UnboundedSender<RelayFrame>>,
    opens: usize,
    closes: usize,
    last_credentials: Option<Credentials>,
    sent: Vec<SentFrame>,
    subscriptions: Vec<Subscription>,
    unsubscriptions: Vec<String>,
    subscribers: HashMap<String, SubscriberSet>,
    fail_sends: bool,
    fail_subscribe: bool,
    fail_close: bool,
}

/// Scriptable relay network. Clones share state; hand one clone to the
/// code under test as its [`RelayConnector`] and drive it with the other.
#[derive(Clone)]
pub struct MockRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MockRelay {
    pub fn new(address: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState {
                address: address.to_string(),
                behavior: ConnectBehavior::Immediate,
                failing_opens: 0,
                generation: 0,
                pending_connect: None,
                links: BTreeMap::new(),
                opens: 0,
                closes: 0,
                last_credentials: None,
                sent: Vec::new(),
                subscriptions: Vec::new(),
                unsubscriptions: Vec::new(),
                subscribers: HashMap::new(),
                fail_sends: false,
                fail_subscribe: false,
                fail_close: false,
            })),
        }
    }

    pub fn connector(&self) -> Arc<dyn RelayConnector> {
        Arc::new(self.clone())
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        lock(&self.state).behavior = behavior;
    }

    /// Fail the next `count` opens, then fall back to the set behavior.
    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.state).failing_opens = count;
    }

    /// Finish a held connect. Returns `false` if none is pending.
    pub fn complete_connect(&self) -> bool {
        let mut state = lock(&self.state);
        let address = state.address.clone();
        match state.pending_connect.take() {
            Some(tx) => tx.send(address).is_ok(),
            None => false,
        }
    }

    pub fn has_pending_connect(&self) -> bool {
        lock(&self.state).pending_connect.is_some()
    }

    /// Deliver a text frame on the newest link.
    pub fn inject_text(&self, source: &str, text: &str) -> bool {
        self.inject(source, FramePayload::Text(text.to_string()))
    }

    pub fn inject_binary(&self, source: &str, bytes: &[u8]) -> bool {
        self.inject(source, FramePayload::Binary(bytes.to_vec()))
    }

    fn inject(&self, source: &str, payload: FramePayload) -> bool {
        let state = lock(&self.state);
        let Some((_, tx)) = state.links.last_key_value() else {
            return false;
        };
        tx.send(RelayFrame { source: source.to_string(), payload }).is_ok()
    }

    /// End the newest frame stream as if the network dropped the client.
    pub fn drop_link(&self) {
        lock(&self.state).links.pop_last();
    }

    pub fn set_subscribers(&self, topic_hash: &str, subscribers: SubscriberSet) {
        lock(&self.state).subscribers.insert(topic_hash.to_string(), subscribers);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        lock(&self.state).fail_subscribe = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        lock(&self.state).fail_close = fail;
    }

    pub fn opens(&self) -> usize {
        lock(&self.state).opens
    }

    pub fn closes(&self) -> usize {
        lock(&self.state).closes
    }

    pub fn last_credentials(&self) -> Option<Credentials> {
        lock(&self.state).last_credentials.clone()
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        lock(&self.state).sent.clone()
    }

    /// Sent frames whose `contentType` is `content_type`.
    pub fn sent_of_type(&self, content_type: &str) -> Vec<SentFrame> {
        self.sent()
            .into_iter()
            .filter(|frame| frame.content_type().as_deref() == Some(content_type))
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.state).subscriptions.clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        lock(&self.state).unsubscriptions.clone()
    }
}

#[async_trait]
impl RelayConnector for MockRelay {
    async fn open(&self, credentials: &Credentials) -> Result<RelayLink, RelayError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.opens += 1;
        state.last_credentials = Some(credentials.clone());
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(RelayError::new("scripted open failure"));
        }
        if let ConnectBehavior::Fail(message) = &state.behavior {
            return Err(RelayError::new(message.clone()));
        }

        state.generation += 1;
        let (connected_tx, connected) = oneshot::channel();
        let (frame_tx, frames) = mpsc::unbounded_channel();
        state.links.insert(state.generation, frame_tx);
        if state.behavior == ConnectBehavior::Hold {
            state.pending_connect = Some(connected_tx);
        } else {
            let _ = connected_tx.send(state.address.clone());
        }

        let client = MockClient { generation: state.generation, state: self.state.clone() };
        Ok(RelayLink { client: Arc::new(client), connected, frames })
    }
}

struct MockClient {
    generation: u64,
    state: Arc<Mutex<RelayState>>,
}

#[async_trait]
impl RelayClient for MockClient {
    async fn send(
        &self,
        destinations: &[String],
        payload: &str,
        options: SendOptions,
    ) -> Result<(), RelayError> {
        let mut state = lock(&self.state);
        if state.fail_sends {
            return Err(RelayError::new("scripted send failure"));
        }
        state.sent.push(SentFrame {
            destinations: destinations.to_vec(),
            payload: payload.to_string(),
            options,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, duration: u32, fee: &str) -> Result<String, RelayError> {
        let mut state = lock(&self.state);
        if state.fail_subscribe {
            return Err(RelayError::new("scripted subscribe failure"));
        }
        state.subscriptions.push(Subscription {
            topic: topic.to_string(),
            duration,
            fee: fee.to_string(),
        });
        Ok(format!("txn-sub-{}", state.subscriptions.len()))
    }

    async fn unsubscribe(&self, topic: &str, _fee: &str) -> Result<String, RelayError> {
        let mut state = lock(&self.state);
        state.unsubscriptions.push(topic.to_string());
        Ok(format!("txn-unsub-{}", state.unsubscriptions.len()))
    }

    async fn get_subscribers(
        &self,
        topic: &str,
        _query: SubscribersQuery,
    ) -> Result<SubscriberSet, RelayError> {
        let state = lock(&self.state);
        Ok(state.subscribers.get(topic).cloned().unwrap_or(SubscriberSet::List(Vec::new())))
    }

    async fn close(&self) -> Result<(), RelayError> {
        let mut state = lock(&self.state);
        state.closes += 1;
        state.links.remove(&self.generation);
        if state.generation == self.generation {
            state.pending_connect = None;
        }
        if state.fail_close {
            return Err(RelayError::new("scripted close failure"));
        }
        Ok(())
    }
}

/// Pairing state kept in memory. Codes are `PAIR-<n>`.
#[derive(Default)]
pub struct MemoryPairingStore {
    allow_from: Mutex<HashMap<String, Vec<String>>>,
    requests: Mutex<Vec<(String, String, String)>>,
    fail_reads: Mutex<bool>,
}

impl MemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve `sender_id` for `account_id`.
    pub fn approve(&self, account_id: &str, sender_id: &str) {
        lock(&self.allow_from)
            .entry(account_id.to_string())
            .or_default()
            .push(sender_id.to_string());
    }

    /// Pending requests as `(account_id, sender_id, code)`.
    pub fn requests(&self) -> Vec<(String, String, String)> {
        lock(&self.requests).clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        *lock(&self.fail_reads) = fail;
    }
}

#[async_trait]
impl PairingStore for MemoryPairingStore {
    async fn read_allow_from(&self, account_id: &str) -> Result<Vec<String>, CollaboratorError> {
        if *lock(&self.fail_reads) {
            return Err(CollaboratorError::new("pairing", "scripted read failure"));
        }
        Ok(lock(&self.allow_from).get(account_id).cloned().unwrap_or_default())
    }

    async fn upsert_pairing_request(
        &self,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairingRequest, CollaboratorError> {
        let mut requests = lock(&self.requests);
        if let Some((_, _, code)) = requests
            .iter()
            .find(|(account, sender, _)| account == account_id && sender == sender_id)
        {
            return Ok(PairingRequest { code: code.clone(), created: false });
        }
        let code = format!("PAIR-{}", requests.len() + 1);
        requests.push((account_id.to_string(), sender_id.to_string(), code.clone()));
        Ok(PairingRequest { code, created: true })
    }

    fn build_pairing_reply(&self, sender_id: &str, code: &str) -> String {
        format!("{sender_id} is not paired yet. Pairing code: {code}")
    }
}

/// Records every dispatched context and optionally answers each with a
/// fixed reply.
#[derive(Default)]
pub struct RecordingDispatcher {
    contexts: Mutex<Vec<InboundContext>>,
    reply: Mutex<Option<String>>,
    delivery_errors: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every dispatched message with `text`.
    pub fn replying(text: &str) -> Self {
        let dispatcher = Self::default();
        *lock(&dispatcher.reply) = Some(text.to_string());
        dispatcher
    }

    pub fn set_fail(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn contexts(&self) -> Vec<InboundContext> {
        lock(&self.contexts).clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.contexts().into_iter().map(|context| context.message.body).collect()
    }

    pub fn delivery_errors(&self) -> Vec<String> {
        lock(&self.delivery_errors).clone()
    }
}

#[async_trait]
impl ReplyDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        context: InboundContext,
        replies: ReplySink,
    ) -> Result<(), CollaboratorError> {
        lock(&self.contexts).push(context);
        if *lock(&self.fail) {
            return Err(CollaboratorError::new("dispatcher", "scripted dispatch failure"));
        }
        let reply = lock(&self.reply).clone();
        if let Some(text) = reply {
            if let Err(err) = replies.deliver(&text).await {
                lock(&self.delivery_errors).push(err.to_string());
            }
        }
        Ok(())
    }
}
