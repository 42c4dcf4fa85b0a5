//! End-to-end scenarios for the subscription hub
//!
//! Drives the public `Hub` API the way the WebSocket shell does: register a
//! session, feed it text frames, read frames from its outbound queue.
//!
//! Covers:
//! - Reply shapes for subscribe, unsubscribe and listing
//! - Subscription cap and rate limiting
//! - Private delivery isolation and concurrent auth limits
//! - Idle reaping with grace re-arm
//! - Slow consumer disconnection and per-topic ordering

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use stream_gateway::auth::StaticAccountOracle;
use stream_gateway::events::DomainEvent;
use stream_gateway::protocol::ServerMessage;
use stream_gateway::registry::{CloseReason, SessionHandle};
use stream_gateway::{Hub, HubConfig};
use tokio::sync::mpsc;
use types::category::Category;
use types::ids::AccountId;
use types::pair::Pair;

const ALICE_KEY: &str = "alice-key";
const BOB_KEY: &str = "bob-key";

struct Accounts {
    alice: AccountId,
    bob: AccountId,
}

fn build(tweak: impl FnOnce(&mut HubConfig)) -> (Hub, Accounts) {
    let accounts = Accounts {
        alice: AccountId::new(),
        bob: AccountId::new(),
    };
    let mut config = HubConfig {
        api_keys: HashMap::from([
            (ALICE_KEY.to_string(), accounts.alice),
            (BOB_KEY.to_string(), accounts.bob),
        ]),
        ..HubConfig::default()
    };
    tweak(&mut config);
    let oracle = Arc::new(StaticAccountOracle::new(config.api_keys.clone()));
    (Hub::new(&config, oracle).unwrap(), accounts)
}

fn hub() -> (Hub, Accounts) {
    build(|_| {})
}

fn ip(last: u8) -> IpAddr {
    IpAddr::from([192, 168, 0, last])
}

fn pair(raw: &str) -> Pair {
    Pair::parse(raw).unwrap()
}

async fn next(client: &mut SessionHandle) -> ServerMessage {
    let frame = client.outbound.recv().await.expect("outbound frame");
    serde_json::from_str(&frame).unwrap()
}

async fn request(hub: &Hub, client: &mut SessionHandle, op: &str, content: &str) -> ServerMessage {
    let raw = json!({ "op": op, "content": content }).to_string();
    hub.router.process(client.id, &raw).await;
    next(client).await
}

#[tokio::test]
async fn test_sub_then_unsub_all_scenario() {
    let (hub, _) = hub();
    let mut client = hub.registry.register(ip(1)).unwrap();

    let reply = request(&hub, &mut client, "sub", "ETH_USD_PERP:trades").await;
    assert_eq!(
        serde_json::to_value(&reply).unwrap(),
        json!({
            "code": 200,
            "msg": "subscribed",
            "category": "trades",
            "pair": "ETH_USD_PERP",
            "result": ["ETH_USD_PERP:trades"]
        })
    );

    let reply = request(&hub, &mut client, "unsub_all", "empty").await;
    assert_eq!(
        serde_json::to_value(&reply).unwrap(),
        json!({
            "code": 200,
            "msg": "unsubscribed",
            "category": "unsub_all",
            "pair": null,
            "result": []
        })
    );
    assert!(!hub.registry.is_active(client.id));
}

#[tokio::test]
async fn test_sub_pair_round_trip() {
    let (hub, _) = hub();
    let mut client = hub.registry.register(ip(2)).unwrap();

    let reply = request(&hub, &mut client, "sub_pair", "BTC_USD_PERP").await;
    assert_eq!(reply.msg, "subscribed");
    assert_eq!(reply.category, "sub_pair");

    let reply = request(&hub, &mut client, "subscriptions", "empty").await;
    let expected: Vec<String> = Category::PUBLIC
        .iter()
        .map(|c| format!("BTC_USD_PERP:{c}"))
        .collect();
    assert_eq!(reply.result, json!(expected));
    assert_eq!(
        expected,
        [
            "BTC_USD_PERP:depth",
            "BTC_USD_PERP:ticker",
            "BTC_USD_PERP:index",
            "BTC_USD_PERP:ohlcv",
            "BTC_USD_PERP:match",
            "BTC_USD_PERP:trades",
            "BTC_USD_PERP:liquidation",
        ]
    );
}

#[tokio::test]
async fn test_eleventh_subscription_rejected() {
    let (hub, _) = hub();
    let mut client = hub.registry.register(ip(3)).unwrap();

    for i in 0..10 {
        let reply = request(&hub, &mut client, "sub", &format!("P{i}_USD:depth")).await;
        assert_eq!(reply.code, 200);
    }
    let before = request(&hub, &mut client, "subscriptions", "empty").await.result;

    let reply = request(&hub, &mut client, "sub_pair", "EXTRA_USD").await;
    assert_eq!(reply.code, 403);
    assert_eq!(reply.category, "error");
    assert_eq!(reply.pair.as_deref(), Some("EXTRA_USD"));

    let after = request(&hub, &mut client, "subscriptions", "empty").await.result;
    assert_eq!(before, after);
    assert_eq!(hub.index.subscription_count(client.id), 10);
}

#[tokio::test]
async fn test_unsub_of_unknown_topic_is_noop() {
    let (hub, _) = hub();
    let mut client = hub.registry.register(ip(4)).unwrap();

    let reply = request(&hub, &mut client, "unsub", "SOL_USD_PERP:ticker").await;
    assert_eq!((reply.code, reply.msg.as_str()), (200, "unsubscribed"));

    let reply = request(&hub, &mut client, "unsub_all", "empty").await;
    assert_eq!((reply.code, reply.msg.as_str()), (200, "unsubscribed"));
}

#[tokio::test]
async fn test_private_events_reach_only_owner_sessions() {
    let (hub, accounts) = hub();
    let mut alice_1 = hub.registry.register(ip(5)).unwrap();
    let mut alice_2 = hub.registry.register(ip(6)).unwrap();
    let mut bob = hub.registry.register(ip(7)).unwrap();
    let mut anon = hub.registry.register(ip(8)).unwrap();

    for (client, key) in [(&mut alice_1, ALICE_KEY), (&mut alice_2, ALICE_KEY), (&mut bob, BOB_KEY)] {
        let reply = request(&hub, client, "auth_api", key).await;
        assert_eq!(reply.msg, "authenticated");
    }
    request(&hub, &mut anon, "sub_pair", "BTC_USD_PERP").await;

    let event = DomainEvent::private(
        pair("BTC_USD_PERP"),
        Category::OrderAdded,
        accounts.alice,
        json!({"order_id": "o-42"}),
    );
    let report = hub.fanout.publish(&event);
    assert_eq!(report.delivered, 2);

    for client in [&mut alice_1, &mut alice_2] {
        let msg = next(client).await;
        assert_eq!(msg.category, "order_added");
        assert_eq!(msg.result["order_id"], "o-42");
    }
    assert!(bob.outbound.try_recv().is_err());
    assert!(anon.outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_private_category_cannot_be_subscribed() {
    let (hub, _) = hub();
    let mut client = hub.registry.register(ip(9)).unwrap();

    let reply = request(&hub, &mut client, "sub", "BTC_USD_PERP:position_updated").await;
    assert_eq!(reply.code, 400);
    assert_eq!(reply.category, "error");
}

#[tokio::test(start_paused = true)]
async fn test_twenty_first_message_rate_limited() {
    let (hub, _) = hub();
    let mut client = hub.registry.register(ip(10)).unwrap();

    for _ in 0..20 {
        let reply = request(&hub, &mut client, "status", "empty").await;
        assert_eq!(reply.code, 200);
    }
    let reply = request(&hub, &mut client, "sub", "BTC_USD_PERP:ticker").await;
    assert_eq!(reply.code, 429);
    assert_eq!(hub.index.subscription_count(client.id), 0);

    tokio::time::advance(Duration::from_secs(1)).await;
    let reply = request(&hub, &mut client, "sub", "BTC_USD_PERP:ticker").await;
    assert_eq!(reply.code, 200);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_follows_account_after_auth() {
    let (hub, _) = hub();
    let mut first = hub.registry.register(ip(11)).unwrap();
    let mut second = hub.registry.register(ip(12)).unwrap();

    request(&hub, &mut first, "auth_api", ALICE_KEY).await;
    request(&hub, &mut second, "auth_api", ALICE_KEY).await;

    // Budget is shared by every session of the account
    for _ in 0..10 {
        assert_eq!(request(&hub, &mut first, "status", "empty").await.code, 200);
        assert_eq!(request(&hub, &mut second, "status", "empty").await.code, 200);
    }
    assert_eq!(request(&hub, &mut first, "status", "empty").await.code, 429);
    assert_eq!(request(&hub, &mut second, "status", "empty").await.code, 429);
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_reaped_after_grace() {
    let (hub, _) = hub();
    let (_events_tx, events_rx) = mpsc::channel(16);
    let tasks = hub.spawn(events_rx);

    let idle = hub.registry.register(ip(13)).unwrap();
    let mut busy = hub.registry.register(ip(13)).unwrap();
    request(&hub, &mut busy, "sub", "BTC_USD_PERP:depth").await;

    tokio::time::sleep(Duration::from_millis(29_500)).await;
    assert!(hub.registry.contains(idle.id));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!hub.registry.contains(idle.id));
    assert_eq!(idle.closed.await.unwrap(), CloseReason::IdleTimeout);
    assert!(hub.registry.contains(busy.id));

    // unsub_all re-arms the grace from that moment
    request(&hub, &mut busy, "unsub_all", "empty").await;
    tokio::time::sleep(Duration::from_millis(29_500)).await;
    assert!(hub.registry.contains(busy.id));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!hub.registry.contains(busy.id));

    assert_eq!(hub.stats().idle_closed, 2);
    for task in tasks {
        task.abort();
    }
}

#[tokio::test(start_paused = true)]
async fn test_authenticated_connection_never_reaped() {
    let (hub, _) = hub();
    let (_events_tx, events_rx) = mpsc::channel(16);
    let tasks = hub.spawn(events_rx);

    let mut client = hub.registry.register(ip(14)).unwrap();
    request(&hub, &mut client, "auth_api", BOB_KEY).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(hub.registry.contains(client.id));

    for task in tasks {
        task.abort();
    }
}

#[tokio::test]
async fn test_deregister_leaves_no_dangling_membership() {
    let (hub, accounts) = hub();
    let mut client = hub.registry.register(ip(15)).unwrap();
    let btc = pair("BTC_USD_PERP");

    request(&hub, &mut client, "auth_api", ALICE_KEY).await;
    request(&hub, &mut client, "sub_pair", "BTC_USD_PERP").await;
    request(&hub, &mut client, "sub", "ETH_USD_PERP:ticker").await;

    assert!(hub.registry.deregister(client.id, CloseReason::ClientClosed));
    assert!(!hub.registry.deregister(client.id, CloseReason::ClientClosed));

    for category in Category::PUBLIC {
        assert!(!hub.index.recipients(&btc, category).contains(&client.id));
    }
    assert!(hub.index.recipients(&pair("ETH_USD_PERP"), Category::Ticker).is_empty());
    assert!(hub.index.private_recipients(&accounts.alice).is_empty());
    assert_eq!(hub.index.active_pairs(), 0);
    assert_eq!(hub.registry.account_connections(accounts.alice), 0);
}

#[tokio::test]
async fn test_ip_connection_limit() {
    let (hub, _) = hub();
    let sessions: Vec<_> = (0..10)
        .map(|_| hub.registry.register(ip(16)).unwrap())
        .collect();

    let err = hub.registry.register(ip(16)).err().unwrap();
    assert_eq!(err.code(), 429);
    assert_eq!(hub.stats().connections_rejected, 1);

    hub.registry.deregister(sessions[0].id, CloseReason::ClientClosed);
    assert!(hub.registry.register(ip(16)).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_auth_never_exceeds_account_cap() {
    let (hub, accounts) = build(|c| c.max_connections_per_ip = 100);
    let ids: Vec<_> = (0..25)
        .map(|_| hub.registry.register(ip(17)).unwrap().id)
        .collect();

    let attempts: Vec<_> = ids
        .iter()
        .map(|id| {
            let hub = hub.clone();
            let id = *id;
            tokio::spawn(async move { hub.auth.authenticate(id, ALICE_KEY).await })
        })
        .collect();

    let mut granted = 0;
    let mut limited = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => granted += 1,
            Err(e) => {
                assert_eq!(e.code(), 429);
                limited += 1;
            }
        }
    }

    assert_eq!(granted, 10);
    assert_eq!(limited, 15);
    assert_eq!(hub.registry.account_connections(accounts.alice), 10);
    assert_eq!(hub.index.private_recipients(&accounts.alice).len(), 10);
}

#[tokio::test]
async fn test_slow_consumer_disconnected() {
    let (hub, _) = build(|c| c.outbound_queue_capacity = 4);
    let mut slow = hub.registry.register(ip(18)).unwrap();
    let mut fast = hub.registry.register(ip(19)).unwrap();

    request(&hub, &mut slow, "sub", "BTC_USD_PERP:depth").await;
    request(&hub, &mut fast, "sub", "BTC_USD_PERP:depth").await;

    for seq in 0..10 {
        let event = DomainEvent::public(pair("BTC_USD_PERP"), Category::Depth, json!({ "seq": seq }));
        hub.fanout.publish(&event);
        assert_eq!(next(&mut fast).await.result["seq"], seq);
    }

    assert!(!hub.registry.contains(slow.id));
    assert_eq!((&mut slow.closed).await.unwrap(), CloseReason::SlowConsumer);
    assert_eq!(hub.stats().slow_consumer_closed, 1);
    assert!(hub.registry.contains(fast.id));
}

#[tokio::test]
async fn test_events_through_fanout_workers_keep_topic_order() {
    let (hub, _) = hub();
    let (events_tx, events_rx) = mpsc::channel(256);
    let tasks = hub.spawn(events_rx);

    let mut client = hub.registry.register(ip(20)).unwrap();
    request(&hub, &mut client, "sub_pair", "BTC_USD_PERP").await;
    request(&hub, &mut client, "sub_pair", "ETH_USD_PERP").await;

    let pairs = ["BTC_USD_PERP", "ETH_USD_PERP"];
    for seq in 0..200u64 {
        let p = pair(pairs[(seq % 2) as usize]);
        events_tx
            .send(DomainEvent::public(p, Category::Trades, json!({ "seq": seq })))
            .await
            .unwrap();
    }

    let mut last: HashMap<String, u64> = HashMap::new();
    for _ in 0..200 {
        let msg = next(&mut client).await;
        assert_eq!(msg.msg, "update");
        let seq = msg.result["seq"].as_u64().unwrap();
        let pair = msg.pair.clone().unwrap();
        if let Some(prev) = last.insert(pair, seq) {
            assert!(seq > prev);
        }
    }

    for task in tasks {
        task.abort();
    }
}

#[tokio::test]
async fn test_malformed_frames_get_error_replies() {
    let (hub, _) = hub();
    let mut client = hub.registry.register(ip(21)).unwrap();

    for raw in ["", "hello", r#"{"op":"sub"}"#, r#"{"op":"status","content":""}"#] {
        hub.router.process(client.id, raw).await;
        let reply = next(&mut client).await;
        assert_eq!(reply.code, 400, "{raw}");
        assert_eq!(reply.category, "error");
        assert_eq!(reply.result, Value::Null);
    }
    assert_eq!(hub.stats().messages_malformed, 4);
}
