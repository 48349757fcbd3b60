#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{AuthenticatedIdentity, MemoryStorage, NotificationDispatcher};
use domain::{ChatRoom, RoomId, User, UserId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::Infrastructure;
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "integration-test-secret-key-32-chars-min";

pub struct TestServer {
    pub addr: SocketAddr,
    pub storage: Arc<MemoryStorage>,
    pub jwt: JwtService,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 启动使用进程内存储的服务，预置 alice、bob 和房间 R1
pub async fn spawn_server() -> TestServer {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_user(User::new(UserId::parse("alice").unwrap(), "Alice"))
        .await;
    storage
        .insert_user(User::new(UserId::parse("bob").unwrap(), "Bob"))
        .await;
    storage
        .insert_room(
            ChatRoom::new(RoomId::parse("R1").unwrap(), "general").with_participants([
                UserId::parse("alice").unwrap(),
                UserId::parse("bob").unwrap(),
            ]),
        )
        .await;

    let infra = Infrastructure::in_memory(
        storage.clone(),
        Arc::new(NotificationDispatcher::disabled()),
    );
    let jwt = JwtService::new(&JwtConfig {
        secret: TEST_SECRET.to_string(),
    });
    let state = AppState::new(infra.build_hub(64), infra.health.clone(), Arc::new(jwt.clone()));
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        storage,
        jwt,
        shutdown: Some(shutdown_tx),
    }
}

impl TestServer {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token_for(&self, user: &str) -> String {
        let identity = AuthenticatedIdentity {
            user_id: UserId::parse(user).unwrap(),
            display_name: user.to_string(),
            avatar: None,
        };
        self.jwt
            .issue_token(&identity, chrono::Duration::hours(1))
            .expect("issue token")
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }

    pub async fn connect(&self, user: &str) -> Client {
        let (client, _) = connect_async(self.ws_url(&self.token_for(user)))
            .await
            .expect("websocket connect");
        client
    }
}

pub async fn emit(client: &mut Client, event: Value) {
    client
        .send(TungsteniteMessage::Text(event.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取事件直到出现指定类型，返回其 data
pub async fn expect_event(client: &mut Client, kind: &str) -> Value {
    expect_event_matching(client, kind, |_| true).await
}

pub async fn expect_event_matching(
    client: &mut Client,
    kind: &str,
    predicate: impl Fn(&Value) -> bool,
) -> Value {
    let wait = async {
        while let Some(frame) = client.next().await {
            let frame = frame.expect("websocket frame");
            let TungsteniteMessage::Text(text) = frame else {
                continue;
            };
            let value: Value = serde_json::from_str(text.as_str()).expect("json event");
            if value["event"] == kind && predicate(&value["data"]) {
                return value["data"].clone();
            }
        }
        panic!("connection closed while waiting for {kind}");
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
}
