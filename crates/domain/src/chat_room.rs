use crate::value_objects::{RoomId, UserId};

/// 聊天室。成员列表由外部的房间服务维护，核心只读取它来决定通知对象。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    pub participants: Vec<UserId>,
}

impl ChatRoom {
    pub fn new(id: RoomId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            participants: Vec::new(),
        }
    }

    /// 追加成员，保持插入顺序且不重复
    pub fn add_participant(&mut self, user_id: UserId) {
        if !self.participants.contains(&user_id) {
            self.participants.push(user_id);
        }
    }

    pub fn with_participants(mut self, participants: impl IntoIterator<Item = UserId>) -> Self {
        for user_id in participants {
            self.add_participant(user_id);
        }
        self
    }

    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.participants.contains(user_id)
    }
}
