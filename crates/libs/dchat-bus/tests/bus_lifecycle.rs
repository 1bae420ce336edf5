use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dchat_bus::{
    Bus, BusError, ConnectionState, Credentials, SubscriberSet, CONNECT_TIMEOUT,
    MSG_HOLDING_SECONDS,
};
use dchat_test_support::{eventually, ConnectBehavior, MockRelay};
use tokio_util::sync::CancellationToken;

fn credentials() -> Credentials {
    Credentials {
        seed: "00".repeat(32),
        identifier: Some("bot".into()),
        num_sub_clients: 4,
        seed_rpc_servers: Vec::new(),
    }
}

fn bus_with(relay: &MockRelay) -> Arc<Bus> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(Bus::new("test", relay.connector()))
}

#[tokio::test]
async fn connect_reports_address_and_state_transitions() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    let mut states = bus.subscribe_state();

    let address = bus.connect(&credentials(), &CancellationToken::new()).await.expect("connect");

    assert_eq!(address, "bot.abc");
    assert_eq!(bus.address().await.as_deref(), Some("bot.abc"));
    assert!(bus.is_connected());
    assert_eq!(states.try_recv().expect("connecting"), ConnectionState::Connecting);
    assert_eq!(states.try_recv().expect("connected"), ConnectionState::Connected);
    assert_eq!(relay.last_credentials().expect("opened").identifier.as_deref(), Some("bot"));
}

#[tokio::test]
async fn already_cancelled_connect_never_opens() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = bus.connect(&credentials(), &cancel).await.expect_err("cancelled");

    assert_eq!(err, BusError::Cancelled);
    assert_eq!(relay.opens(), 0);
    assert_eq!(bus.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn connect_times_out_and_closes_the_client() {
    let relay = MockRelay::new("bot.abc");
    relay.set_behavior(ConnectBehavior::Hold);
    let bus = bus_with(&relay);

    let started = tokio::time::Instant::now();
    let err = bus.connect(&credentials(), &CancellationToken::new()).await.expect_err("timeout");

    assert_eq!(err, BusError::ConnectTimeout { secs: CONNECT_TIMEOUT.as_secs() });
    assert!(started.elapsed() >= CONNECT_TIMEOUT);
    assert_eq!(relay.closes(), 1);
    assert_eq!(bus.state(), ConnectionState::Disconnected);
    assert!(bus.address().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn cancel_during_handshake_closes_the_client() {
    let relay = MockRelay::new("bot.abc");
    relay.set_behavior(ConnectBehavior::Hold);
    let bus = bus_with(&relay);
    let cancel = CancellationToken::new();

    let attempt = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.connect(&credentials(), &cancel).await })
    };
    assert!(eventually(|| relay.has_pending_connect()).await);
    assert_eq!(bus.state(), ConnectionState::Connecting);

    cancel.cancel();
    let outcome = attempt.await.expect("join");

    assert_eq!(outcome, Err(BusError::Cancelled));
    assert_eq!(relay.closes(), 1);
    assert_eq!(bus.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn held_connect_completes_when_the_relay_answers() {
    let relay = MockRelay::new("bot.abc");
    relay.set_behavior(ConnectBehavior::Hold);
    let bus = bus_with(&relay);

    let attempt = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.connect(&credentials(), &CancellationToken::new()).await })
    };
    assert!(eventually(|| relay.has_pending_connect()).await);
    assert!(relay.complete_connect());

    assert_eq!(attempt.await.expect("join"), Ok("bot.abc".to_string()));
    assert!(bus.is_connected());
}

#[tokio::test]
async fn open_failure_leaves_bus_disconnected() {
    let relay = MockRelay::new("bot.abc");
    relay.set_behavior(ConnectBehavior::Fail("seed rpc unreachable".into()));
    let bus = bus_with(&relay);

    let err = bus.connect(&credentials(), &CancellationToken::new()).await.expect_err("fails");

    assert_eq!(err.to_string(), "relay: seed rpc unreachable");
    assert!(err.is_retryable());
    assert_eq!(bus.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn operations_require_a_connection() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);

    assert_eq!(bus.send("alice", "{}").await, Err(BusError::NotConnected));
    assert_eq!(bus.send_fire_and_forget("alice", "{}").await, Err(BusError::NotConnected));
    assert_eq!(bus.send_to_many(&[], "{}").await, Err(BusError::NotConnected));
    assert_eq!(bus.subscribe("t", 10, "0").await, Err(BusError::NotConnected));
    assert_eq!(bus.unsubscribe("t", "0").await, Err(BusError::NotConnected));
    assert_eq!(bus.list_subscribers("t").await, Err(BusError::NotConnected));
    assert!(relay.sent().is_empty());
}

#[tokio::test]
async fn sends_carry_the_expected_options() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    bus.connect(&credentials(), &CancellationToken::new()).await.expect("connect");

    bus.send("alice", "acked").await.expect("send");
    bus.send_fire_and_forget("bob", "fire").await.expect("send");
    bus.send_to_many(&["carol".into(), "dave".into()], "fan").await.expect("send");
    bus.send_to_many(&[], "nobody").await.expect("empty fan-out");

    let sent = relay.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].destinations, vec!["alice".to_string()]);
    assert!(!sent[0].options.no_reply);
    assert_eq!(sent[0].options.msg_holding_seconds, Some(MSG_HOLDING_SECONDS));
    assert!(sent[1].options.no_reply);
    assert_eq!(sent[2].destinations, vec!["carol".to_string(), "dave".to_string()]);
    assert!(sent[2].options.no_reply);
}

#[tokio::test]
async fn relay_send_failures_propagate() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    bus.connect(&credentials(), &CancellationToken::new()).await.expect("connect");
    relay.set_fail_sends(true);

    let err = bus.send("alice", "x").await.expect_err("fails");
    assert!(matches!(err, BusError::Relay(_)));
    assert!(bus.is_connected());
}

#[tokio::test]
async fn ledger_calls_pass_through() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    bus.connect(&credentials(), &CancellationToken::new()).await.expect("connect");

    let mut keyed = BTreeMap::new();
    keyed.insert("bob.1".to_string(), serde_json::json!(""));
    keyed.insert("alice.2".to_string(), serde_json::json!({"meta": 1}));
    relay.set_subscribers("dchathash", SubscriberSet::Keyed(keyed));

    assert_eq!(bus.subscribe("dchathash", 400_000, "0").await.expect("subscribe"), "txn-sub-1");
    assert_eq!(bus.unsubscribe("dchathash", "0").await.expect("unsubscribe"), "txn-unsub-1");
    assert_eq!(
        bus.list_subscribers("dchathash").await.expect("list"),
        vec!["alice.2".to_string(), "bob.1".to_string()]
    );
    assert!(bus.list_subscribers("other").await.expect("list").is_empty());
    assert_eq!(relay.subscriptions()[0].duration, 400_000);
}

#[tokio::test]
async fn inbound_frames_arrive_as_text() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    let mut frames = bus.take_frames().await.expect("frames");
    assert!(bus.take_frames().await.is_none());
    bus.connect(&credentials(), &CancellationToken::new()).await.expect("connect");

    assert!(relay.inject_text("__1__.alice", "{\"id\":\"1\"}"));
    assert!(relay.inject_binary("bob", b"{\"id\":\"2\"}"));

    let first = frames.recv().await.expect("frame");
    assert_eq!(first.source, "__1__.alice");
    assert_eq!(first.text, "{\"id\":\"1\"}");
    let second = frames.recv().await.expect("frame");
    assert_eq!(second.source, "bob");
    assert_eq!(second.text, "{\"id\":\"2\"}");
}

#[tokio::test]
async fn disconnect_is_idempotent_and_swallows_close_errors() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    bus.connect(&credentials(), &CancellationToken::new()).await.expect("connect");
    relay.set_fail_close(true);

    bus.disconnect().await;
    bus.disconnect().await;

    assert_eq!(relay.closes(), 1);
    assert_eq!(bus.state(), ConnectionState::Disconnected);
    assert!(bus.address().await.is_none());
}

#[tokio::test]
async fn reconnect_replaces_the_client_and_keeps_the_frame_stream() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    let mut frames = bus.take_frames().await.expect("frames");

    bus.connect(&credentials(), &CancellationToken::new()).await.expect("connect");
    bus.connect(&credentials(), &CancellationToken::new()).await.expect("reconnect");

    assert_eq!(relay.opens(), 2);
    assert_eq!(relay.closes(), 1);
    assert!(relay.inject_text("alice", "after"));
    assert_eq!(frames.recv().await.expect("frame").text, "after");
}

#[tokio::test(start_paused = true)]
async fn link_loss_is_observable() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    bus.connect(&credentials(), &CancellationToken::new()).await.expect("connect");

    relay.drop_link();

    tokio::time::timeout(Duration::from_secs(1), bus.link_lost()).await.expect("link lost");
}

#[tokio::test(start_paused = true)]
async fn reconnect_timer_elapses_or_is_cut_short() {
    let relay = MockRelay::new("bot.abc");
    let bus = bus_with(&relay);
    let cancel = CancellationToken::new();

    assert!(bus.wait_reconnect(Duration::from_secs(5), &cancel).await);

    let pending = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.wait_reconnect(Duration::from_secs(60), &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    bus.disconnect().await;
    assert!(!pending.await.expect("join"));

    let pending = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.wait_reconnect(Duration::from_secs(60), &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();
    assert!(!pending.await.expect("join"));
}
