use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{ChatRoom, Message, MessageId, RepositoryError, RoomId, User, UserId};
use serde_json::json;
use tokio::sync::Notify;

use super::*;
use crate::broadcaster::EventReceiver;
use crate::clock::SystemClock;
use crate::notification::NotificationDispatcher;
use crate::presence::memory::MemoryPresenceRegistry;
use crate::repository::memory::MemoryStorage;
use crate::repository::MessageRepository;
use crate::services::MessagePipelineDependencies;

fn user_id(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

fn identity(id: &str) -> AuthenticatedIdentity {
    AuthenticatedIdentity {
        user_id: user_id(id),
        display_name: id.to_uppercase(),
        avatar: None,
    }
}

fn hub_with(storage: Arc<MemoryStorage>, messages: Arc<dyn MessageRepository>) -> Arc<ChatHub> {
    let bus = Arc::new(RoomBroadcastBus::new(32));
    let pipeline = MessagePipeline::new(MessagePipelineDependencies {
        message_repository: messages,
        room_repository: storage.clone(),
        user_repository: storage,
        broadcaster: bus.clone(),
        notifier: Arc::new(NotificationDispatcher::disabled()),
        clock: Arc::new(SystemClock),
    });
    Arc::new(ChatHub::new(
        Arc::new(MemoryPresenceRegistry::new()),
        bus,
        Arc::new(pipeline),
    ))
}

async fn hub() -> (Arc<ChatHub>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert_user(User::new(user_id("alice"), "Alice")).await;
    storage.insert_user(User::new(user_id("bob"), "Bob")).await;
    storage
        .insert_room(
            ChatRoom::new(RoomId::parse("R1").unwrap(), "general")
                .with_participants([user_id("alice"), user_id("bob")]),
        )
        .await;
    (hub_with(storage.clone(), storage.clone()), storage)
}

async fn connect(hub: &Arc<ChatHub>, id: &str) -> (ConnectionSession, EventReceiver) {
    let mut session = ConnectionSession::new(Arc::clone(hub), identity(id));
    let receiver = session.establish().await.unwrap();
    (session, receiver)
}

fn drain(receiver: &mut EventReceiver) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event.as_ref().clone());
    }
    events
}

fn last_online_users(events: &[ServerEvent]) -> Option<Vec<UserId>> {
    events.iter().rev().find_map(|event| match event {
        ServerEvent::OnlineUsers(users) => Some(users.clone()),
        _ => None,
    })
}

async fn send(session: &ConnectionSession, value: serde_json::Value) {
    session.handle_text(&value.to_string()).await;
}

#[tokio::test]
async fn test_establish_and_terminate_publish_presence() {
    let (hub, _) = hub().await;
    let (mut alice, mut alice_rx) = connect(&hub, "alice").await;
    let (mut bob, mut bob_rx) = connect(&hub, "bob").await;

    assert_eq!(alice.state(), SessionState::Established);
    assert_eq!(
        last_online_users(&drain(&mut alice_rx)),
        Some(vec![user_id("alice"), user_id("bob")])
    );
    drain(&mut bob_rx);

    alice.terminate().await;
    assert_eq!(alice.state(), SessionState::Terminated);
    assert_eq!(last_online_users(&drain(&mut bob_rx)), Some(vec![user_id("bob")]));

    // 重复断开不会再次广播
    alice.terminate().await;
    assert!(drain(&mut bob_rx).is_empty());

    bob.terminate().await;
    assert_eq!(hub.online_count().await, 0);
    assert_eq!(hub.broadcaster.connection_count(), 0);
}

#[tokio::test]
async fn test_user_stays_online_while_another_device_is_connected() {
    let (hub, _) = hub().await;
    let (mut phone, _phone_rx) = connect(&hub, "alice").await;
    let (mut laptop, _laptop_rx) = connect(&hub, "alice").await;
    let (_bob, mut bob_rx) = connect(&hub, "bob").await;

    phone.terminate().await;
    assert!(hub.presence.is_online(&user_id("alice")).await);
    assert_eq!(
        last_online_users(&drain(&mut bob_rx)),
        Some(vec![user_id("alice"), user_id("bob")])
    );

    laptop.terminate().await;
    assert_eq!(last_online_users(&drain(&mut bob_rx)), Some(vec![user_id("bob")]));
}

#[tokio::test]
async fn test_message_and_read_receipt_flow() {
    let (hub, storage) = hub().await;
    let (alice, mut alice_rx) = connect(&hub, "alice").await;
    let (bob, mut bob_rx) = connect(&hub, "bob").await;

    send(&alice, json!({"event": "join-room", "data": "R1"})).await;
    send(&bob, json!({"event": "join-room", "data": "R1"})).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    send(
        &alice,
        json!({"event": "send-message", "data": {"sender": "alice", "content": "hi", "messageType": "text", "room": "R1"}}),
    )
    .await;

    let received = drain(&mut bob_rx);
    let [ServerEvent::ReceiveMessage(message)] = received.as_slice() else {
        panic!("expected one receive-message, got {received:?}");
    };
    assert_eq!(message.content, "hi");
    assert_eq!(message.sender.id, user_id("alice"));
    assert!(storage.find_by_id(&message.id).await.unwrap().is_some());
    drain(&mut alice_rx);

    send(
        &bob,
        json!({"event": "message-read", "data": {"messageId": message.id, "userId": "bob", "room": "R1"}}),
    )
    .await;

    for receiver in [&mut alice_rx, &mut bob_rx] {
        let events = drain(receiver);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::MessageReadUpdate(receipt)] if receipt.user_id == user_id("bob") && receipt.message_id == message.id
        ));
    }
}

#[tokio::test]
async fn test_typing_is_relayed_to_everyone_else_in_the_room() {
    let (hub, _) = hub().await;
    let (alice, mut alice_rx) = connect(&hub, "alice").await;
    let (bob, mut bob_rx) = connect(&hub, "bob").await;
    send(&alice, json!({"event": "join-room", "data": "R1"})).await;
    send(&bob, json!({"event": "join-room", "data": "R1"})).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    send(&alice, json!({"event": "typing", "data": {"room": "R1", "user": "Alice"}})).await;
    send(&alice, json!({"event": "stop-typing", "data": {"room": "R1"}})).await;

    assert!(drain(&mut alice_rx).is_empty());
    let events = drain(&mut bob_rx);
    assert_eq!(events.len(), 2);
    match &events[0] {
        ServerEvent::UserTyping(signal) => assert_eq!(signal.extra["user"], "Alice"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(events[1], ServerEvent::UserStopTyping(_)));
}

#[tokio::test]
async fn test_errors_go_only_to_the_originating_connection() {
    let (hub, storage) = hub().await;
    let (alice, mut alice_rx) = connect(&hub, "alice").await;
    let (bob, mut bob_rx) = connect(&hub, "bob").await;
    send(&alice, json!({"event": "join-room", "data": "R1"})).await;
    send(&bob, json!({"event": "join-room", "data": "R1"})).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    // 冒充他人发送
    send(
        &alice,
        json!({"event": "send-message", "data": {"sender": "bob", "content": "spoof", "room": "R1"}}),
    )
    .await;
    // 缺少内容
    send(&alice, json!({"event": "send-message", "data": {"sender": "alice", "room": "R1"}})).await;
    // 无法解析
    alice.handle_text("not json").await;

    let events = drain(&mut alice_rx);
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|event| matches!(event, ServerEvent::Error(_))));
    assert!(drain(&mut bob_rx).is_empty());
    assert!(storage
        .messages_in_room(&RoomId::parse("R1").unwrap())
        .await
        .is_empty());
}

#[tokio::test]
async fn test_read_receipt_for_unknown_message_reports_not_found() {
    let (hub, _) = hub().await;
    let (bob, mut bob_rx) = connect(&hub, "bob").await;
    drain(&mut bob_rx);

    send(
        &bob,
        json!({"event": "message-read", "data": {"messageId": "missing", "userId": "bob", "room": "R1"}}),
    )
    .await;

    let events = drain(&mut bob_rx);
    assert!(matches!(
        events.as_slice(),
        [ServerEvent::Error(payload)] if payload.message == "message not found"
    ));
    assert_eq!(bob.state(), SessionState::Established);
}

#[tokio::test]
async fn test_events_before_establish_are_ignored() {
    let (hub, _) = hub().await;
    let session = ConnectionSession::new(Arc::clone(&hub), identity("alice"));

    send(&session, json!({"event": "join-room", "data": "R1"})).await;
    assert!(hub.broadcaster.members(&RoomId::parse("R1").unwrap()).is_empty());
    assert_eq!(hub.online_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_all_become_members() {
    let (hub, _) = hub().await;
    let mut sessions = Vec::new();
    for i in 0..24 {
        let (session, receiver) = connect(&hub, &format!("user-{i}")).await;
        sessions.push((session, receiver));
    }

    let mut handles = Vec::new();
    for (session, receiver) in sessions {
        handles.push(tokio::spawn(async move {
            session
                .handle(ClientEvent::JoinRoom("R1".to_string()))
                .await;
            (session, receiver)
        }));
    }
    let mut joined = Vec::new();
    for handle in handles {
        joined.push(handle.await.unwrap());
    }

    let members = hub.broadcaster.members(&RoomId::parse("R1").unwrap());
    assert_eq!(members.len(), 24);
    for (session, _) in &joined {
        assert!(members.contains(&session.connection_id()));
    }
}

/// 在持久化前挂起，直到测试放行
struct GatedMessages {
    inner: Arc<MemoryStorage>,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl MessageRepository for GatedMessages {
    async fn create_message(&self, message: Message) -> Result<Message, RepositoryError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.create_message(message).await
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        MessageRepository::find_by_id(self.inner.as_ref(), id).await
    }

    async fn add_reader(&self, id: &MessageId, reader: &UserId) -> Result<(), RepositoryError> {
        self.inner.add_reader(id, reader).await
    }
}

#[tokio::test]
async fn test_accepted_message_completes_after_sender_disconnects() {
    let storage = Arc::new(MemoryStorage::new());
    let gated = Arc::new(GatedMessages {
        inner: storage.clone(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let hub = hub_with(storage.clone(), gated.clone());

    let (alice, _alice_rx) = connect(&hub, "alice").await;
    let (bob, mut bob_rx) = connect(&hub, "bob").await;
    send(&alice, json!({"event": "join-room", "data": "R1"})).await;
    send(&bob, json!({"event": "join-room", "data": "R1"})).await;
    drain(&mut bob_rx);

    let alice = Arc::new(alice);
    let in_flight = tokio::spawn({
        let alice = Arc::clone(&alice);
        async move {
            send(
                &alice,
                json!({"event": "send-message", "data": {"sender": "alice", "content": "still here", "room": "R1"}}),
            )
            .await;
        }
    });

    // 持久化进行中时取消发送方的处理
    gated.entered.notified().await;
    in_flight.abort();
    gated.release.notify_one();

    let event = tokio::time::timeout(Duration::from_secs(2), bob_rx.recv())
        .await
        .expect("message should still be broadcast")
        .expect("bus should stay open");
    assert!(matches!(event.as_ref(), ServerEvent::ReceiveMessage(m) if m.content == "still here"));
    assert_eq!(
        storage
            .messages_in_room(&RoomId::parse("R1").unwrap())
            .await
            .len(),
        1
    );
}
