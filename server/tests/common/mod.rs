//! Shared helpers for the integration tests: boot a server on a random port,
//! seed rooms and players, and drive gateway sockets.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use cvr_server::matchmaking::{MatchmakingMode, MatchmakingSettings};
use cvr_server::players::{Ban, PlayerRecord};
use cvr_server::rooms::{Capabilities, Room, RoomMetadata, Subroom, EVERYONE_TIER};
use cvr_server::state::AppState;
use cvr_server::ws::KeepAlive;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "integration-test-secret";
pub const DAILY_REWARD: i64 = 50;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Seed a room whose primary subroom has `max_players` and `mode`.
    /// Users listed in `denied` get a tier without the join capability.
    pub async fn seed_room(&self, room_id: &str, max_players: u32, mode: MatchmakingMode, denied: &[&str]) {
        let mut permission_table = HashMap::new();
        permission_table.insert(EVERYONE_TIER.to_string(), Capabilities { join: true });
        permission_table.insert("restricted".to_string(), Capabilities { join: false });

        let permissions = denied
            .iter()
            .map(|u| (u.to_string(), "restricted".to_string()))
            .collect();

        self.state
            .rooms
            .put(&Room {
                id: room_id.to_string(),
                name: room_id.to_string(),
                metadata: RoomMetadata {
                    permissions,
                    permission_table,
                    subrooms: vec![Subroom {
                        max_players,
                        matchmaking_mode: mode,
                    }],
                },
            })
            .await
            .expect("seed room");
    }

    /// Seed a player record and return a valid token for them.
    pub async fn seed_player(&self, user_id: &str, username: &str, developer: bool) -> String {
        self.state
            .players
            .push(user_id, &PlayerRecord::new(username))
            .await
            .expect("seed player");
        self.token(user_id, username, developer)
    }

    pub async fn seed_banned_player(&self, user_id: &str, username: &str) -> String {
        let mut record = PlayerRecord::new(username);
        record.bans.push(Ban {
            reason: "griefing".to_string(),
            end_ts: chrono::Utc::now().timestamp_millis() + 3_600_000,
        });
        self.state
            .players
            .push(user_id, &record)
            .await
            .expect("seed banned player");
        self.token(user_id, username, false)
    }

    pub fn token(&self, user_id: &str, username: &str, developer: bool) -> String {
        cvr_server::auth::jwt::issue_access_token(TEST_SECRET.as_bytes(), user_id, username, developer)
            .expect("issue token")
    }

    pub async fn connect(&self, path: &str) -> WsClient {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws(path))
            .await
            .expect("WebSocket connect");
        ws
    }

    /// Connect on a text protocol path and complete the handshake.
    pub async fn connect_authorized(&self, path: &str, token: &str) -> WsClient {
        let mut ws = self.connect(path).await;
        send_text(&mut ws, &format!("Bearer {token}")).await;
        assert_eq!(recv_text(&mut ws).await, "AUTHORIZED");
        ws
    }
}

/// Start the server on a random port with a fresh data directory.
pub async fn start_test_server() -> TestServer {
    start_test_server_with_keepalive(KeepAlive::default()).await
}

/// Like `start_test_server`, with custom ping timing.
pub async fn start_test_server_with_keepalive(keepalive: KeepAlive) -> TestServer {
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = data_dir.path().to_str().expect("utf-8 temp path").to_string();

    let db = cvr_server::db::init_db(&path).expect("Failed to init DB");
    let jwt_secret = cvr_server::auth::jwt::load_or_generate_jwt_secret(&path, Some(TEST_SECRET))
        .expect("Failed to load JWT secret");

    let mut state = AppState::new(db, jwt_secret, MatchmakingSettings::default(), DAILY_REWARD);
    state.keepalive = keepalive;
    let app = cvr_server::routes::build_router(state.clone()).expect("build router");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        state,
        _data_dir: data_dir,
    }
}

pub async fn send_text(ws: &mut WsClient, text: &str) {
    ws.send(Message::text(text)).await.expect("send frame");
}

/// Next text frame, skipping keep-alive frames. Panics on close or timeout.
pub async fn recv_text(ws: &mut WsClient) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("receive error");
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    serde_json::from_str(&recv_text(ws).await).expect("JSON frame")
}

/// Wait for the server's close frame and return its code.
pub async fn recv_close_code(ws: &mut WsClient) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended before close frame")
            .expect("receive error");
        match msg {
            Message::Close(Some(frame)) => return u16::from(frame.code),
            Message::Close(None) => panic!("close frame without code"),
            _ => continue,
        }
    }
}

/// Assert that no text frame arrives within `wait`.
pub async fn assert_silent(ws: &mut WsClient, wait: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(wait, ws.next()).await {
        panic!("unexpected frame: {}", text.as_str());
    }
}

/// Poll until `check` holds or a few seconds pass. Disconnect cleanup runs
/// after the socket is gone, so tests observing it have to wait.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached in time");
}

/// Parse `PUN_CMD CREATE-OR-JOIN-ROOM <code> <max>` into (code, max).
pub fn parse_join(reply: &str) -> (String, u32) {
    let mut parts = reply.split_whitespace();
    assert_eq!(parts.next(), Some("PUN_CMD"), "unexpected reply: {reply}");
    assert_eq!(parts.next(), Some("CREATE-OR-JOIN-ROOM"), "unexpected reply: {reply}");
    let code = parts.next().expect("join code").to_string();
    let max = parts.next().expect("max players").parse().expect("numeric max players");
    (code, max)
}
