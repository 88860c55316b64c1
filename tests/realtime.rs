use futures_util::{SinkExt, StreamExt};
use realtime_hub::{Config, auth::Claims, server::App};
use serde_json::{Value, json};
use std::{net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{Message, frame::coding::CloseCode},
};
use url::Url;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "integration-secret";

struct Server {
    addr: SocketAddr,
    app_token: Box<dyn Fn(&str, &[&str], u64) -> String + Send + Sync>,
}

impl Server {
    async fn start(mut config: Config) -> Self {
        config.jwt_secret = SECRET.to_string();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = App::new(config);
        let hub = app.hub().clone();
        tokio::spawn(app.serve(listener, std::future::pending()));

        let app_token = Box::new(move |user: &str, permissions: &[&str], ttl_secs: u64| {
            let claims = Claims::new(user, ttl_secs)
                .with_username(user)
                .with_permissions(permissions.iter().copied());
            hub.authenticator().issue_token(&claims).unwrap()
        });
        Self { addr, app_token }
    }

    fn token(&self, user: &str, permissions: &[&str]) -> String {
        (self.app_token)(user, permissions, 3600)
    }

    fn short_lived_token(&self, user: &str, ttl_secs: u64) -> String {
        (self.app_token)(user, &[], ttl_secs)
    }

    fn ws_url(&self, token: Option<&str>) -> Url {
        let mut url = Url::parse(&format!("ws://{}/ws", self.addr)).unwrap();
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }

    async fn connect(&self, user: &str, permissions: &[&str]) -> Ws {
        let token = self.token(user, permissions);
        let (mut ws, _) = connect_async(self.ws_url(Some(&token)).as_str()).await.unwrap();
        let connected = expect(&mut ws, "connected").await;
        assert_eq!(connected["data"]["user_id"], user);
        ws
    }

    async fn get(&self, path: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", self.addr);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next JSON message, skipping transport-level frames.
async fn next_json(ws: &mut Ws) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await.expect("socket closed").expect("socket error") {
                Message::Text(text) => return serde_json::from_str::<Value>(text.as_str()).unwrap(),
                Message::Close(frame) => panic!("unexpected close: {frame:?}"),
                _ => continue,
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

async fn expect(ws: &mut Ws, kind: &str) -> Value {
    let message = next_json(ws).await;
    assert_eq!(message["type"], kind, "unexpected message {message}");
    message
}

/// Waits for the server's close frame, skipping anything sent before it.
async fn close_code(ws: &mut Ws) -> CloseCode {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return frame.code,
                Some(Ok(Message::Close(None))) => panic!("close frame without a code"),
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for close")
}

async fn join(ws: &mut Ws, room: &str) -> Value {
    send(ws, json!({"type": "join_room", "room": room})).await;
    expect(ws, "room_state").await
}

#[tokio::test]
async fn test_two_users_join_same_room() {
    let server = Server::start(Config::default()).await;
    let mut alice = server.connect("alice", &[]).await;
    let mut bob = server.connect("bob", &[]).await;

    let state = join(&mut alice, "sheet-42").await;
    assert_eq!(state["data"]["total_users"], 1);
    assert_eq!(state["room"], "sheet-42");

    let state = join(&mut bob, "sheet-42").await;
    assert_eq!(state["data"]["total_users"], 2);
    assert_eq!(state["data"]["users"][0]["user_id"], "alice");

    let joined = expect(&mut alice, "user_joined").await;
    assert_eq!(joined["data"]["user_id"], "bob");
    assert_eq!(joined["data"]["total_users"], 2);
    assert!(joined["message_id"].is_string());
    assert!(joined["timestamp"].is_string());

    bob.close(None).await.unwrap();
    let left = expect(&mut alice, "user_left").await;
    assert_eq!(left["data"]["user_id"], "bob");
    assert_eq!(left["data"]["total_users"], 1);
}

#[tokio::test]
async fn test_unknown_type_gets_error_and_socket_stays_open() {
    let server = Server::start(Config::default()).await;
    let mut alice = server.connect("alice", &[]).await;

    send(&mut alice, json!({"type": "unknown_type"})).await;
    let error = expect(&mut alice, "error").await;
    assert_eq!(error["data"]["code"], "unknown_message_type");

    alice.send(Message::Text("{broken".to_string().into())).await.unwrap();
    let error = expect(&mut alice, "error").await;
    assert_eq!(error["data"]["code"], "invalid_message");

    send(&mut alice, json!({"type": "ping"})).await;
    expect(&mut alice, "pong").await;
}

#[tokio::test]
async fn test_rate_limited_messages_get_error_reply() {
    let mut config = Config::default();
    config.message_limits.per_minute = 5;
    let server = Server::start(config).await;
    let mut alice = server.connect("alice", &[]).await;

    for _ in 0..6 {
        send(&mut alice, json!({"type": "ping"})).await;
    }
    for _ in 0..5 {
        expect(&mut alice, "pong").await;
    }
    let error = expect(&mut alice, "error").await;
    assert_eq!(error["data"]["code"], "rate_limited");
}

#[tokio::test]
async fn test_invalid_token_closes_with_policy_violation() {
    let server = Server::start(Config::default()).await;

    for url in [server.ws_url(Some("not-a-jwt")), server.ws_url(None)] {
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        let error = next_json(&mut ws).await;
        assert_eq!(error["data"]["code"], "authentication_failed");

        let code = close_code(&mut ws).await;
        assert_eq!(code, CloseCode::Policy);
        assert_eq!(u16::from(code), 1008);
    }
}

#[tokio::test]
async fn test_repeated_bad_tokens_are_throttled_per_ip() {
    let mut config = Config::default();
    config.connection_limits.per_minute = 2;
    let server = Server::start(config).await;

    for _ in 0..2 {
        let (mut ws, _) = connect_async(server.ws_url(Some("forged")).as_str()).await.unwrap();
        assert_eq!(close_code(&mut ws).await, CloseCode::Policy);
    }
    let (mut ws, _) = connect_async(server.ws_url(Some("forged")).as_str()).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["data"]["code"], "rate_limited");
    assert_eq!(u16::from(close_code(&mut ws).await), 1013);
}

#[tokio::test]
async fn test_expired_token_is_closed_at_next_heartbeat() {
    let mut config = Config::default();
    config.jwt_leeway_secs = 0;
    config.heartbeat_interval_secs = 1;
    let server = Server::start(config).await;

    let token = server.short_lived_token("alice", 1);
    let (mut ws, _) = connect_async(server.ws_url(Some(&token)).as_str()).await.unwrap();
    expect(&mut ws, "connected").await;

    // The client only answers transport pings, which tungstenite does on its own.
    assert_eq!(close_code(&mut ws).await, CloseCode::Policy);
}

#[tokio::test]
async fn test_cursor_move_reaches_others_but_not_sender() {
    let server = Server::start(Config::default()).await;
    let mut alice = server.connect("alice", &[]).await;
    let mut bob = server.connect("bob", &[]).await;
    let mut carol = server.connect("carol", &[]).await;

    join(&mut alice, "r").await;
    join(&mut bob, "r").await;
    expect(&mut alice, "user_joined").await;
    join(&mut carol, "r").await;
    expect(&mut alice, "user_joined").await;
    expect(&mut bob, "user_joined").await;

    send(
        &mut alice,
        json!({"type": "cursor_move", "room": "r", "data": {"x": 12.5, "y": 40, "cell": "B7"}}),
    )
    .await;
    for ws in [&mut bob, &mut carol] {
        let moved = expect(ws, "cursor_moved").await;
        assert_eq!(moved["data"]["user_id"], "alice");
        assert_eq!(moved["data"]["x"], 12.5);
        assert_eq!(moved["data"]["y"], 40.0);
        assert_eq!(moved["data"]["cell"], "B7");
    }

    // Nothing was queued for alice ahead of her pong.
    send(&mut alice, json!({"type": "ping"})).await;
    expect(&mut alice, "pong").await;
}

#[tokio::test]
async fn test_room_full_is_reported_to_joiner() {
    let mut config = Config::default();
    config.room_max_members = Some(1);
    let server = Server::start(config).await;
    let mut alice = server.connect("alice", &[]).await;
    let mut bob = server.connect("bob", &[]).await;

    join(&mut alice, "tiny").await;
    send(&mut bob, json!({"type": "join_room", "room": "tiny"})).await;
    let error = expect(&mut bob, "error").await;
    assert_eq!(error["data"]["code"], "room_full");
}

#[tokio::test]
async fn test_admin_api_reports_rooms_and_stats() {
    let server = Server::start(Config::default()).await;
    let mut alice = server.connect("alice", &[]).await;
    join(&mut alice, "sheet-1").await;

    let stats = server.get("/api/realtime/stats").await;
    assert!(stats.starts_with("HTTP/1.1 200"));
    assert!(stats.contains("\"total_connections\":1"));

    let rooms = server.get("/api/rooms").await;
    assert!(rooms.contains("\"room_id\":\"sheet-1\""));

    let presence = server.get("/api/rooms/sheet-1/presence").await;
    assert!(presence.contains("\"user_id\":\"alice\""));

    let missing = server.get("/api/rooms/nope").await;
    assert!(missing.starts_with("HTTP/1.1 404"));
    assert!(missing.contains("RoomNotFound"));
}
