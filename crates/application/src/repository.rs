use async_trait::async_trait;
use domain::{ChatRoom, Message, MessageId, RepositoryError, RoomId, User, UserId};

#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 持久化消息，返回存储后的记录
    async fn create_message(&self, message: Message) -> Result<Message, RepositoryError>;

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError>;

    // 记录已读；消息不存在时返回 NotFound，重复记录不报错
    async fn add_reader(&self, id: &MessageId, reader: &UserId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ChatRoomRepository: Send + Sync {
    async fn find_by_id(&self, id: &RoomId) -> Result<Option<ChatRoom>, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
}

/// 存储健康检查，供 `/health` 使用
#[async_trait]
pub trait StorageHealth: Send + Sync {
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// 进程内存储实现（用于开发和测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryStorage {
        messages: RwLock<HashMap<MessageId, Message>>,
        rooms: RwLock<HashMap<RoomId, ChatRoom>>,
        users: RwLock<HashMap<UserId, User>>,
        unavailable: AtomicBool,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert_user(&self, user: User) {
            self.users.write().await.insert(user.id.clone(), user);
        }

        pub async fn insert_room(&self, room: ChatRoom) {
            self.rooms.write().await.insert(room.id.clone(), room);
        }

        /// 直接写入一条消息，绕过发送流程
        pub async fn insert_message(&self, message: Message) {
            self.messages
                .write()
                .await
                .insert(message.id.clone(), message);
        }

        /// 模拟存储不可用：之后的所有操作都返回存储错误
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub async fn messages_in_room(&self, room_id: &RoomId) -> Vec<Message> {
            let messages = self.messages.read().await;
            let mut found: Vec<Message> = messages
                .values()
                .filter(|message| &message.room_id == room_id)
                .cloned()
                .collect();
            found.sort_by_key(|message| message.created_at);
            found
        }

        fn check_available(&self) -> Result<(), RepositoryError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(RepositoryError::storage("memory storage marked unavailable"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MessageRepository for MemoryStorage {
        async fn create_message(&self, message: Message) -> Result<Message, RepositoryError> {
            self.check_available()?;
            let mut messages = self.messages.write().await;
            if messages.contains_key(&message.id) {
                return Err(RepositoryError::Conflict);
            }
            messages.insert(message.id.clone(), message.clone());
            Ok(message)
        }

        async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
            self.check_available()?;
            Ok(self.messages.read().await.get(id).cloned())
        }

        async fn add_reader(&self, id: &MessageId, reader: &UserId) -> Result<(), RepositoryError> {
            self.check_available()?;
            let mut messages = self.messages.write().await;
            let message = messages.get_mut(id).ok_or(RepositoryError::NotFound)?;
            message.mark_read(reader.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl ChatRoomRepository for MemoryStorage {
        async fn find_by_id(&self, id: &RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
            self.check_available()?;
            Ok(self.rooms.read().await.get(id).cloned())
        }
    }

    #[async_trait]
    impl UserRepository for MemoryStorage {
        async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
            self.check_available()?;
            Ok(self.users.read().await.get(id).cloned())
        }
    }

    #[async_trait]
    impl StorageHealth for MemoryStorage {
        async fn ping(&self) -> Result<(), RepositoryError> {
            self.check_available()
        }
    }

}
