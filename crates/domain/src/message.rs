use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::DomainError;
use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Audio,
    Video,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::Audio => "audio",
            MessageType::Video => "video",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "audio" => Ok(MessageType::Audio),
            "video" => Ok(MessageType::Video),
            other => Err(DomainError::invalid_argument(
                "message_type",
                format!("unsupported type {other}"),
            )),
        }
    }
}

/// 聊天消息。
///
/// 创建后除了已读集合只增不减之外不可变。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub message_type: MessageType,
    pub reply_to: Option<MessageId>,
    pub forwarded_from: Option<MessageId>,
    pub file_name: Option<String>,
    pub created_at: Timestamp,
    pub read_by: BTreeSet<UserId>,
}

impl Message {
    pub fn new(
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        content: MessageContent,
        message_type: MessageType,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            content,
            message_type,
            reply_to: None,
            forwarded_from: None,
            file_name: None,
            created_at,
            read_by: BTreeSet::new(),
        }
    }

    pub fn with_reply_to(mut self, reply_to: Option<MessageId>) -> Self {
        self.reply_to = reply_to;
        self
    }

    pub fn with_forwarded_from(mut self, forwarded_from: Option<MessageId>) -> Self {
        self.forwarded_from = forwarded_from;
        self
    }

    pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name.filter(|name| !name.trim().is_empty());
        self
    }

    /// 记录已读，返回是否为新增读者。重复调用不会改变集合。
    pub fn mark_read(&mut self, reader: UserId) -> bool {
        self.read_by.insert(reader)
    }

    pub fn is_read_by(&self, reader: &UserId) -> bool {
        self.read_by.contains(reader)
    }
}
