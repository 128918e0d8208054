use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use room_relay::model::connection::ConnectionId;
use room_relay::{Registry, RelayConfig, RelayServer};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

/// Id that is never allocated in these tests, for listing every member.
const NOBODY: ConnectionId = ConnectionId::new(u64::MAX);

fn test_config() -> RelayConfig {
    RelayConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        health_listen: None,
        ping_interval: Duration::from_secs(30),
        ping_timeout: Duration::from_secs(30),
        max_frame_size: 64 * 1024,
        outbox_capacity: 128,
    }
}

struct Harness {
    addr: SocketAddr,
    registry: Arc<Registry>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), room_relay::RelayError>>,
}

impl Harness {
    async fn start(config: RelayConfig) -> Harness {
        let server = RelayServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));
        Harness {
            addr,
            registry,
            stop,
            handle,
        }
    }

    async fn connect(&self) -> TestClient {
        let url = format!("ws://{}", self.addr);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        TestClient { ws }
    }

    /// Wait until `room` has exactly `count` members.
    async fn wait_members(&self, room: &str, count: usize) {
        self.wait_until(|r| r.members_excluding(room, NOBODY).len() == count)
            .await;
    }

    async fn wait_until(&self, check: impl Fn(&Registry) -> bool) {
        self.wait_within(RECV_TIMEOUT, check).await;
    }

    async fn wait_within(&self, limit: Duration, check: impl Fn(&Registry) -> bool) {
        let deadline = Instant::now() + limit;
        while !check(&self.registry) {
            assert!(Instant::now() < deadline, "registry never reached expected state");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn send(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    async fn join(&mut self, room: &str) {
        self.send(json!({"type": "join", "room": room})).await;
    }

    /// Next text event, or `None` if nothing arrives within `wait`.
    async fn next_event(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.ws.next()).await.ok()??;
            match msg.ok()? {
                Message::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    async fn recv(&mut self) -> Value {
        self.next_event(RECV_TIMEOUT)
            .await
            .expect("expected an event from the relay")
    }

    async fn assert_silent(&mut self) {
        if let Some(event) = self.next_event(QUIET).await {
            panic!("unexpected event: {event}");
        }
    }
}

#[tokio::test]
async fn test_three_peer_room() {
    let harness = Harness::start(test_config()).await;
    let mut a = harness.connect().await;
    let mut b = harness.connect().await;
    let mut c = harness.connect().await;

    a.join("room1").await;
    harness.wait_members("room1", 1).await;
    a.assert_silent().await;

    b.join("room1").await;
    assert_eq!(a.recv().await, json!({"type": "ready"}));
    b.assert_silent().await;

    c.join("room1").await;
    assert_eq!(a.recv().await, json!({"type": "ready"}));
    assert_eq!(b.recv().await, json!({"type": "ready"}));

    a.send(json!({"type": "offer", "room": "room1", "description": "SDP1"}))
        .await;
    let offer = json!({"type": "offer", "description": "SDP1"});
    assert_eq!(b.recv().await, offer);
    assert_eq!(c.recv().await, offer);
    a.assert_silent().await;

    b.ws.close(None).await.unwrap();
    harness.wait_members("room1", 2).await;

    a.send(json!({"type": "candidate", "room": "room1", "candidate": "ICE1"}))
        .await;
    assert_eq!(
        c.recv().await,
        json!({"type": "candidate", "candidate": "ICE1"})
    );
    a.assert_silent().await;
}

#[tokio::test]
async fn test_answer_payload_is_forwarded_verbatim() {
    let harness = Harness::start(test_config()).await;
    let mut a = harness.connect().await;
    let mut b = harness.connect().await;
    a.join("r").await;
    harness.wait_members("r", 1).await;
    b.join("r").await;
    a.recv().await;

    let description = json!({"type": "answer", "sdp": "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\n"});
    b.send(json!({"type": "answer", "room": "r", "description": description}))
        .await;

    assert_eq!(
        a.recv().await,
        json!({"type": "answer", "description": description})
    );
    b.assert_silent().await;
}

#[tokio::test]
async fn test_rejoin_leaves_previous_room() {
    let harness = Harness::start(test_config()).await;
    let mut a = harness.connect().await;
    let mut b = harness.connect().await;
    let mut c = harness.connect().await;

    a.join("old").await;
    c.join("new").await;
    harness.wait_members("old", 1).await;
    harness.wait_members("new", 1).await;
    b.join("old").await;
    a.recv().await;

    a.join("new").await;
    assert_eq!(c.recv().await, json!({"type": "ready"}));
    b.assert_silent().await;

    b.send(json!({"type": "offer", "room": "old", "description": "stale"}))
        .await;
    a.assert_silent().await;

    c.send(json!({"type": "offer", "room": "new", "description": "fresh"}))
        .await;
    assert_eq!(
        a.recv().await,
        json!({"type": "offer", "description": "fresh"})
    );
}

#[tokio::test]
async fn test_signal_without_join_is_dropped() {
    let harness = Harness::start(test_config()).await;
    let mut a = harness.connect().await;
    let mut b = harness.connect().await;
    b.join("room1").await;
    harness.wait_members("room1", 1).await;

    a.send(json!({"type": "offer", "room": "room1", "description": "SDP"}))
        .await;
    a.send(json!({"type": "candidate", "room": "missing", "candidate": "ICE"}))
        .await;
    b.assert_silent().await;
    a.assert_silent().await;

    // The connection is still usable afterwards.
    a.join("room1").await;
    assert_eq!(b.recv().await, json!({"type": "ready"}));
}

#[tokio::test]
async fn test_malformed_message_is_reported_to_sender_only() {
    let harness = Harness::start(test_config()).await;
    let mut a = harness.connect().await;
    let mut b = harness.connect().await;
    a.join("room1").await;
    harness.wait_members("room1", 1).await;
    b.join("room1").await;
    a.recv().await;

    b.send_raw("{not json").await;
    b.send(json!({"type": "offer", "room": "room1"})).await;

    for _ in 0..2 {
        let event = b.recv().await;
        assert_eq!(event["type"], "error");
        assert!(event["message"].is_string());
    }
    a.assert_silent().await;

    b.send(json!({"type": "offer", "room": "room1", "description": "ok"}))
        .await;
    assert_eq!(a.recv().await, json!({"type": "offer", "description": "ok"}));
}

#[tokio::test]
async fn test_concurrent_joins_all_see_each_other() {
    const PEERS: usize = 8;
    let harness = Harness::start(test_config()).await;

    let mut clients = Vec::new();
    for _ in 0..PEERS {
        clients.push(harness.connect().await);
    }

    let joins: Vec<_> = clients
        .into_iter()
        .map(|mut client| {
            tokio::spawn(async move {
                client.join("crowd").await;
                client
            })
        })
        .collect();
    let mut clients = Vec::new();
    for join in joins {
        clients.push(join.await.unwrap());
    }
    harness.wait_members("crowd", PEERS).await;

    for (i, client) in clients.iter_mut().enumerate() {
        client
            .send(json!({"type": "candidate", "room": "crowd", "candidate": i}))
            .await;
    }

    for (i, client) in clients.iter_mut().enumerate() {
        let mut seen = Vec::new();
        while seen.len() < PEERS - 1 {
            let event = client.recv().await;
            if event["type"] == "candidate" {
                seen.push(event["candidate"].as_u64().unwrap() as usize);
            }
        }
        seen.sort_unstable();
        let expected: Vec<usize> = (0..PEERS).filter(|p| *p != i).collect();
        assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn test_disconnect_empties_registry() {
    let harness = Harness::start(test_config()).await;
    let mut a = harness.connect().await;
    a.join("room1").await;
    harness.wait_members("room1", 1).await;
    assert_eq!(harness.registry.room_count(), 1);

    drop(a);
    harness
        .wait_until(|r| r.connection_count() == 0 && r.room_count() == 0)
        .await;
}

#[tokio::test]
async fn test_unresponsive_connection_times_out() {
    let config = RelayConfig {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let harness = Harness::start(config).await;

    // Never reads, so never answers a ping.
    let mut silent = harness.connect().await;
    silent.join("room1").await;
    harness.wait_members("room1", 1).await;

    harness
        .wait_until(|r| r.connection_count() == 0 && r.room_count() == 0)
        .await;
}

#[tokio::test]
async fn test_responsive_connection_survives_keepalive() {
    let config = RelayConfig {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let harness = Harness::start(config).await;

    let mut a = harness.connect().await;
    a.join("room1").await;
    harness.wait_members("room1", 1).await;

    // Reading answers pings automatically.
    assert!(a.next_event(Duration::from_secs(1)).await.is_none());
    assert_eq!(harness.registry.connection_count(), 1);
}

#[tokio::test]
async fn test_stalled_reader_is_dropped() {
    let config = RelayConfig {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(200),
        max_frame_size: 1 << 20,
        ..test_config()
    };
    let harness = Harness::start(config).await;

    // Joins, then never drains its socket.
    let mut stalled = harness.connect().await;
    stalled.join("room1").await;
    harness.wait_members("room1", 1).await;

    let mut flooder = harness.connect().await;
    flooder.join("room1").await;
    harness.wait_members("room1", 2).await;

    let sdp = "x".repeat(256 * 1024);
    let flooding = tokio::spawn(async move {
        for _ in 0..64 {
            flooder
                .send(json!({"type": "offer", "room": "room1", "description": &sdp}))
                .await;
        }
        // Keep reading so pings are answered.
        while flooder.next_event(Duration::from_secs(5)).await.is_some() {}
        flooder
    });

    harness
        .wait_within(Duration::from_secs(5), |r| r.connection_count() == 1)
        .await;
    assert_eq!(harness.registry.members_excluding("room1", NOBODY).len(), 1);

    flooding.abort();
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let harness = Harness::start(test_config()).await;
    let mut a = harness.connect().await;
    a.join("room1").await;
    harness.wait_members("room1", 1).await;

    harness.stop.send(()).unwrap();
    harness.handle.await.unwrap().unwrap();

    assert!(a.next_event(RECV_TIMEOUT).await.is_none());
    assert_eq!(harness.registry.connection_count(), 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let config = RelayConfig {
        health_listen: Some("127.0.0.1:0".parse().unwrap()),
        ..test_config()
    };
    let server = RelayServer::bind(config).await.unwrap();
    let health = server.health_addr().unwrap();

    let body: Value = tokio::task::spawn_blocking(move || {
        reqwest::blocking::get(format!("http://{health}/"))
            .unwrap()
            .json()
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(body["status"], "ok");

    let missing = tokio::task::spawn_blocking(move || {
        reqwest::blocking::get(format!("http://{health}/rooms"))
            .unwrap()
            .status()
    })
    .await
    .unwrap();
    assert_eq!(missing, reqwest::StatusCode::NOT_FOUND);

    server.run(async {}).await.unwrap();
}
