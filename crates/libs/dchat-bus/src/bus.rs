use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{BusError, RelayError};
use crate::relay::{
    Credentials, RelayClient, RelayConnector, RelayFrame, RelayLink, SendOptions,
    SubscribersQuery,
};

/// Hard ceiling on one connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Holding window requested for acknowledged sends, so peers that are
/// briefly offline still get the message.
pub const MSG_HOLDING_SECONDS: u32 = 3600;

const STATE_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// An inbound frame with its payload already read as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub source: String,
    pub text: String,
}

struct ActiveLink {
    client: Arc<dyn RelayClient>,
    address: String,
    pump: JoinHandle<()>,
    lost: Arc<Notify>,
}

/// One relay client, its connection state and its inbound frame stream.
///
/// Connection state changes only in [`Bus::connect`] and [`Bus::disconnect`];
/// send and ledger calls read it but never move it.
pub struct Bus {
    name: String,
    connector: Arc<dyn RelayConnector>,
    // Serializes connect/disconnect so attempts never overlap.
    lifecycle: Mutex<()>,
    link: Mutex<Option<ActiveLink>>,
    state: AtomicU8,
    state_tx: broadcast::Sender<ConnectionState>,
    frame_tx: mpsc::UnboundedSender<InboundFrame>,
    frame_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
    reconnect_timer: Mutex<ReconnectTimer>,
}

#[derive(Default)]
struct ReconnectTimer {
    generation: u64,
    token: Option<CancellationToken>,
}

impl Bus {
    /// `name` only labels log lines; use the account id.
    pub fn new(name: impl Into<String>, connector: Arc<dyn RelayConnector>) -> Self {
        let (state_tx, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            connector,
            lifecycle: Mutex::new(()),
            link: Mutex::new(None),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            state_tx,
            frame_tx,
            frame_rx: Mutex::new(Some(frame_rx)),
            reconnect_timer: Mutex::new(ReconnectTimer::default()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address assigned by the relay, while connected.
    pub async fn address(&self) -> Option<String> {
        self.link.lock().await.as_ref().map(|link| link.address.clone())
    }

    /// Receive every state transition from now on.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Take the inbound frame stream. Frames from every connection of this
    /// bus arrive on it; only the first caller gets it.
    pub async fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<InboundFrame>> {
        self.frame_rx.lock().await.take()
    }

    /// Connect, tearing down any existing client first.
    ///
    /// Exactly one of three outcomes is observed: the relay reports the
    /// assigned address, `cancel` fires, or [`CONNECT_TIMEOUT`] elapses. The
    /// last two close the half-built client and leave the bus disconnected.
    pub async fn connect(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<String, BusError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;

        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }

        self.set_state(ConnectionState::Connecting);
        let deadline = Instant::now() + CONNECT_TIMEOUT;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BusError::Cancelled),
            _ = time::sleep_until(deadline) => Err(timeout_error()),
            opened = self.connector.open(credentials) => opened.map_err(BusError::from),
        };
        let RelayLink { client, connected, frames } = match opened {
            Ok(link) => link,
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BusError::Cancelled),
            _ = time::sleep_until(deadline) => Err(timeout_error()),
            address = connected => address.map_err(|_| {
                BusError::from(RelayError::new("client closed before connecting"))
            }),
        };
        let address = match outcome {
            Ok(address) => address,
            Err(err) => {
                log::warn!("bus({}): connect failed: {err}", self.name);
                self.close_quietly(client.as_ref()).await;
                self.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        let lost = Arc::new(Notify::new());
        let pump = self.spawn_pump(frames, lost.clone());
        *self.link.lock().await = Some(ActiveLink { client, address: address.clone(), pump, lost });
        self.set_state(ConnectionState::Connected);
        log::info!("bus({}): connected as {address}", self.name);
        Ok(address)
    }

    /// Cancel any pending reconnect, release the client and go to
    /// `Disconnected`. Never fails; safe to call repeatedly.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
    }

    /// Resolves once the current relay link drops on its own (its frame
    /// stream ended). Returns immediately when there is no link.
    pub async fn link_lost(&self) {
        let lost = self.link.lock().await.as_ref().map(|link| link.lost.clone());
        if let Some(lost) = lost {
            lost.notified().await;
        }
    }

    /// Sleep `delay` as the pending reconnect timer. Returns `false` if the
    /// wait was cut short by `cancel` or by [`Bus::disconnect`].
    pub async fn wait_reconnect(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        let timer = cancel.child_token();
        let generation = {
            let mut slot = self.reconnect_timer.lock().await;
            if let Some(previous) = slot.token.replace(timer.clone()) {
                previous.cancel();
            }
            slot.generation += 1;
            slot.generation
        };

        let elapsed = tokio::select! {
            _ = timer.cancelled() => false,
            _ = time::sleep(delay) => true,
        };

        let mut slot = self.reconnect_timer.lock().await;
        if slot.generation == generation {
            slot.token = None;
        }
        elapsed
    }

    /// Acknowledged send; resolves when the recipient confirms receipt.
    pub async fn send(&self, destination: &str, payload: &str) -> Result<(), BusError> {
        let client = self.client().await?;
        let options =
            SendOptions { no_reply: false, msg_holding_seconds: Some(MSG_HOLDING_SECONDS) };
        client.send(&[destination.to_string()], payload, options).await?;
        Ok(())
    }

    pub async fn send_fire_and_forget(
        &self,
        destination: &str,
        payload: &str,
    ) -> Result<(), BusError> {
        let client = self.client().await?;
        let options = SendOptions { no_reply: true, msg_holding_seconds: None };
        client.send(&[destination.to_string()], payload, options).await?;
        Ok(())
    }

    /// Fire-and-forget fan-out. An empty destination list sends nothing.
    pub async fn send_to_many(
        &self,
        destinations: &[String],
        payload: &str,
    ) -> Result<(), BusError> {
        let client = self.client().await?;
        if destinations.is_empty() {
            return Ok(());
        }
        let options = SendOptions { no_reply: true, msg_holding_seconds: None };
        client.send(destinations, payload, options).await?;
        Ok(())
    }

    /// Returns the ledger transaction hash.
    pub async fn subscribe(
        &self,
        topic_hash: &str,
        duration: u32,
        fee: &str,
    ) -> Result<String, BusError> {
        let client = self.client().await?;
        let txn = client.subscribe(topic_hash, duration, fee).await?;
        log::info!("bus({}): subscribed {topic_hash} for {duration} blocks txn={txn}", self.name);
        Ok(txn)
    }

    /// Returns the ledger transaction hash.
    pub async fn unsubscribe(&self, topic_hash: &str, fee: &str) -> Result<String, BusError> {
        let client = self.client().await?;
        let txn = client.unsubscribe(topic_hash, fee).await?;
        log::info!("bus({}): unsubscribed {topic_hash} txn={txn}", self.name);
        Ok(txn)
    }

    /// Flat address list of `topic_hash` subscribers.
    pub async fn list_subscribers(&self, topic_hash: &str) -> Result<Vec<String>, BusError> {
        let client = self.client().await?;
        let subscribers = client.get_subscribers(topic_hash, SubscribersQuery::default()).await?;
        Ok(subscribers.into_addresses())
    }

    async fn client(&self) -> Result<Arc<dyn RelayClient>, BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| link.client.clone())
            .ok_or(BusError::NotConnected)
    }

    fn spawn_pump(
        &self,
        mut frames: mpsc::UnboundedReceiver<RelayFrame>,
        lost: Arc<Notify>,
    ) -> JoinHandle<()> {
        let name = self.name.clone();
        let frame_tx = self.frame_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                log::trace!("bus({name}): << {}", frame.source);
                let inbound =
                    InboundFrame { source: frame.source, text: frame.payload.into_text() };
                if frame_tx.send(inbound).is_err() {
                    return;
                }
            }
            log::info!("bus({name}): relay link closed");
            lost.notify_one();
        })
    }

    async fn teardown(&self) {
        if let Some(timer) = self.reconnect_timer.lock().await.token.take() {
            timer.cancel();
        }

        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.pump.abort();
            self.close_quietly(link.client.as_ref()).await;
            log::info!("bus({}): disconnected from {}", self.name, link.address);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn close_quietly(&self, client: &dyn RelayClient) {
        if let Err(err) = client.close().await {
            log::warn!("bus({}): close failed: {err}", self.name);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        if previous != next {
            log::debug!("bus({}): {previous:?} -> {next:?}", self.name);
            let _ = self.state_tx.send(next);
        }
    }
}

fn timeout_error() -> BusError {
    BusError::ConnectTimeout { secs: CONNECT_TIMEOUT.as_secs() }
}
