#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chorusserver::auth;
use chorusserver::config::GatewayConfig;
use chorusserver::db;
use chorusserver::models::user::User;
use chorusserver::permissions::Permissions;
use chorusserver::state::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A user created for testing, bundling the record with its raw token.
pub struct TestUser {
    pub user: User,
    pub token: String,
}

impl TestUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    /// Token string formatted for gateway IDENTIFY (includes prefix).
    pub fn gateway_token(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Test server that owns an in-memory SQLite pool and full AppState, with a
/// running dispatcher task. Each instance is isolated.
pub struct TestServer {
    pub state: AppState,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_gateway(GatewayConfig::default()).await
    }

    pub async fn with_gateway(gateway: GatewayConfig) -> Self {
        let pool = db::create_pool("sqlite::memory:")
            .await
            .expect("failed to create test pool");

        let (state, events_rx) = AppState::new(pool, gateway);
        Arc::clone(&state.dispatcher).spawn(events_rx);

        Self { state }
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.state.db
    }

    /// Binds a TCP listener on port 0, spawns the server, and returns the
    /// WebSocket base URL.
    pub async fn spawn(&self) -> String {
        let app = chorusserver::routes::router(self.state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://127.0.0.1:{}", addr.port())
    }

    pub async fn create_user_with_token(&self, username: &str) -> TestUser {
        let user = db::users::create_user(self.pool(), username, false)
            .await
            .expect("failed to create test user");

        let token = auth::generate_token();
        let expires_at = (chrono::Utc::now() + chrono::Duration::days(365))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        auth::insert_user_token(self.pool(), &user.id, &token, &expires_at)
            .await
            .expect("failed to insert token");

        TestUser { user, token }
    }

    pub async fn create_guild(&self, owner: &TestUser, default_permissions: Permissions) -> String {
        db::guilds::create_guild(self.pool(), "test guild", owner.id(), default_permissions)
            .await
            .expect("failed to create guild")
            .id
    }

    pub async fn create_channel(&self, guild_id: &str, name: &str) -> String {
        db::channels::create_channel(self.pool(), guild_id, name, "text")
            .await
            .expect("failed to create channel")
            .id
    }

    pub async fn create_voice_channel(&self, guild_id: &str, name: &str) -> String {
        db::channels::create_channel(self.pool(), guild_id, name, "voice")
            .await
            .expect("failed to create voice channel")
            .id
    }

    pub async fn add_member(&self, guild_id: &str, user: &TestUser) {
        db::members::add_member(self.pool(), guild_id, user.id())
            .await
            .expect("failed to add member");
    }

    pub async fn create_role(
        &self,
        guild_id: &str,
        name: &str,
        position: i64,
        allow: Permissions,
        deny: Permissions,
    ) -> String {
        db::roles::create_role(self.pool(), guild_id, name, position, allow, deny)
            .await
            .expect("failed to create role")
    }

    pub async fn assign_role(&self, guild_id: &str, user: &TestUser, role_id: &str) {
        db::members::add_role(self.pool(), guild_id, user.id(), role_id)
            .await
            .expect("failed to assign role");
    }

    pub async fn set_user_override(
        &self,
        channel_id: &str,
        user: &TestUser,
        allow: Permissions,
        deny: Permissions,
    ) {
        db::overrides::upsert_override(
            self.pool(),
            channel_id,
            db::overrides::TARGET_USER,
            user.id(),
            allow,
            deny,
        )
        .await
        .expect("failed to upsert override");
    }
}

pub async fn connect(url: &str) -> WsClient {
    let (ws, _) = connect_async(format!("{url}/ws")).await.unwrap();
    ws
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame as JSON, skipping control frames. Panics after 5s.
pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
}

/// Next frame with the given opcode, skipping everything else (e.g. a
/// presence.update racing a heartbeat ack).
pub async fn next_op(ws: &mut WsClient, op: u64) -> serde_json::Value {
    loop {
        let frame = recv_json(ws).await;
        if frame["op"] == op {
            return frame;
        }
    }
}

/// Next DISPATCH frame with the given `t`, skipping everything else.
pub async fn next_dispatch(ws: &mut WsClient, event_type: &str) -> serde_json::Value {
    loop {
        let frame = recv_json(ws).await;
        if frame["op"] == 0 && frame["t"] == event_type {
            return frame;
        }
    }
}

/// Assert no DISPATCH of the given `t` arrives within `window`.
pub async fn assert_no_dispatch_of(ws: &mut WsClient, event_type: &str, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_ne!(
                    frame["t"], event_type,
                    "received a {event_type} dispatch that should have been filtered"
                );
            }
            Ok(Some(_)) => {}
        }
    }
}

/// Wait for the close frame and return its code.
pub async fn expect_close(ws: &mut WsClient) -> Option<u16> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code.into()),
            None => return None,
            Some(Ok(_)) => {}
            Some(Err(_)) => return None,
        }
    }
}

/// Full connect flow: consume HELLO, IDENTIFY, return the ready frame.
pub async fn identify(ws: &mut WsClient, user: &TestUser) -> serde_json::Value {
    let hello = recv_json(ws).await;
    assert_eq!(hello["op"], 10, "expected HELLO first");
    send_json(
        ws,
        serde_json::json!({
            "op": 2,
            "d": { "token": user.gateway_token() }
        }),
    )
    .await;
    let ready = next_dispatch(ws, "ready").await;
    assert_eq!(ready["s"], 1, "ready must be the first sequenced dispatch");
    ready
}
