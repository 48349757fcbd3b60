//! 连接边界上的事件定义
//!
//! 线上格式为 `{"event": "<kind>", "data": <payload>}`，事件名使用 kebab-case。

use domain::{Message, MessageId, MessageType, RoomId, Timestamp, UserId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// 客户端发来的事件
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(String),
    LeaveRoom(String),
    UserOnline(String),
    SendMessage(SendMessageIntent),
    Typing(TypingSignal),
    StopTyping(TypingSignal),
    MessageRead(ReadIntent),
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::LeaveRoom(_) => "leave-room",
            ClientEvent::UserOnline(_) => "user-online",
            ClientEvent::SendMessage(_) => "send-message",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::StopTyping(_) => "stop-typing",
            ClientEvent::MessageRead(_) => "message-read",
        }
    }
}

/// 发送消息意图。字段保持原始字符串，由消息管线统一校验。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessageIntent {
    pub sender: String,
    pub content: String,
    #[serde(deserialize_with = "message_type_or_text")]
    pub message_type: MessageType,
    pub room: String,
    pub reply_to: Option<String>,
    pub forwarded_from: Option<String>,
    pub file_name: Option<String>,
}

/// 缺省、`null` 和空字符串都按文本消息处理
fn message_type_or_text<'de, D>(deserializer: D) -> Result<MessageType, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(MessageType::Text),
        Some(value) => value.parse().map_err(serde::de::Error::custom),
    }
}

/// 已读回执请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadIntent {
    pub message_id: String,
    pub user_id: String,
    pub room: String,
}

/// 输入中状态，除 `room` 之外的字段原样转发
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub room: RoomId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    OnlineUsers(Vec<UserId>),
    ReceiveMessage(MessageView),
    UserTyping(TypingSignal),
    UserStopTyping(TypingSignal),
    MessageReadUpdate(ReadReceipt),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::OnlineUsers(_) => "online-users",
            ServerEvent::ReceiveMessage(_) => "receive-message",
            ServerEvent::UserTyping(_) => "user-typing",
            ServerEvent::UserStopTyping(_) => "user-stop-typing",
            ServerEvent::MessageReadUpdate(_) => "message-read-update",
            ServerEvent::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub room: RoomId,
}

/// 发送者的展示信息
///
/// 用户资料查不到时只保留 id。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    pub id: UserId,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl SenderProfile {
    pub fn anonymous(id: UserId) -> Self {
        Self {
            id,
            display_name: None,
            avatar: None,
        }
    }

    /// 通知标题中使用的名字
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// 被回复或被转发的消息摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReference {
    pub id: MessageId,
    pub content: String,
    pub message_type: MessageType,
    pub sender: SenderProfile,
}

/// `receive-message` 携带的补全后的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender: SenderProfile,
    pub room: RoomId,
    pub content: String,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<MessageReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub timestamp: Timestamp,
    pub read_by: Vec<UserId>,
}

impl MessageView {
    pub fn new(message: &Message, sender: SenderProfile) -> Self {
        Self {
            id: message.id.clone(),
            sender,
            room: message.room_id.clone(),
            content: message.content.as_str().to_string(),
            message_type: message.message_type,
            reply_to: None,
            forwarded_from: None,
            file_name: message.file_name.clone(),
            timestamp: message.created_at,
            read_by: message.read_by.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_message_defaults_to_text() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send-message",
            "data": {"sender": "alice", "content": "hi", "room": "R1"}
        }))
        .unwrap();

        match event {
            ClientEvent::SendMessage(intent) => {
                assert_eq!(intent.message_type, MessageType::Text);
                assert!(intent.reply_to.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn blank_or_null_message_type_falls_back_to_text() {
        for message_type in [json!(""), json!(null)] {
            let event: ClientEvent = serde_json::from_value(json!({
                "event": "send-message",
                "data": {"sender": "alice", "content": "hi", "messageType": message_type, "room": "R1"}
            }))
            .unwrap();
            assert!(
                matches!(event, ClientEvent::SendMessage(ref i) if i.message_type == MessageType::Text),
                "messageType {message_type} should default to text"
            );
        }

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send-message",
            "data": {"sender": "alice", "content": "a.png", "messageType": "image", "room": "R1"}
        }))
        .unwrap();
        assert!(matches!(event, ClientEvent::SendMessage(ref i) if i.message_type == MessageType::Image));
    }

    #[test]
    fn unsupported_message_type_is_rejected() {
        let result: Result<ClientEvent, _> = serde_json::from_value(json!({
            "event": "send-message",
            "data": {"sender": "alice", "content": "hi", "messageType": "sticker", "room": "R1"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn send_message_without_content_still_parses() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send-message",
            "data": {"sender": "alice", "room": "R1"}
        }))
        .unwrap();
        assert!(matches!(event, ClientEvent::SendMessage(ref i) if i.content.is_empty()));
    }

    #[test]
    fn join_room_carries_bare_room_id() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"join-room","data":"R1"}"#).unwrap();
        assert_eq!(event, ClientEvent::JoinRoom("R1".to_string()));
    }

    #[test]
    fn typing_keeps_passthrough_fields() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "typing",
            "data": {"room": "R1", "user": "alice", "draft": 3}
        }))
        .unwrap();

        let ClientEvent::Typing(signal) = event else {
            panic!("expected typing");
        };
        let outbound = serde_json::to_value(ServerEvent::UserTyping(signal)).unwrap();
        assert_eq!(
            outbound,
            json!({"event": "user-typing", "data": {"room": "R1", "user": "alice", "draft": 3}})
        );
    }

    #[test]
    fn read_update_uses_camel_case_fields() {
        let event = ServerEvent::MessageReadUpdate(ReadReceipt {
            message_id: MessageId::parse("m1").unwrap(),
            user_id: UserId::parse("bob").unwrap(),
            room: RoomId::parse("R1").unwrap(),
        });
        assert_eq!(
            serde_json::to_value(event).unwrap(),
            json!({"event": "message-read-update", "data": {"messageId": "m1", "userId": "bob", "room": "R1"}})
        );
    }

    #[test]
    fn unknown_events_are_rejected() {
        let parsed = serde_json::from_str::<ClientEvent>(r#"{"event":"delete-room","data":"R1"}"#);
        assert!(parsed.is_err());
    }
}
