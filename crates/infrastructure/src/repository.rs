use application::{ChatRoomRepository, MessageRepository, StorageHealth, UserRepository};
use async_trait::async_trait;
use domain::{
    ChatRoom, Message, MessageContent, MessageId, MessageType, PushSubscription, RepositoryError,
    RoomId, Timestamp, User, UserId,
};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict;
        }
        if db_err.is_foreign_key_violation() {
            return RepositoryError::NotFound;
        }
    }
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: String,
    display_name: String,
    avatar: Option<String>,
    push_subscription: Option<Json<PushSubscription>>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let id = UserId::parse(value.id).map_err(|err| invalid_data(err.to_string()))?;
        Ok(User {
            id,
            display_name: value.display_name,
            avatar: value.avatar,
            push_subscription: value.push_subscription.map(|json| json.0),
        })
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: String,
    name: String,
    participants: Vec<String>,
}

impl TryFrom<RoomRecord> for ChatRoom {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let id = RoomId::parse(value.id).map_err(|err| invalid_data(err.to_string()))?;
        let participants = value
            .participants
            .into_iter()
            .map(UserId::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| invalid_data(err.to_string()))?;
        Ok(ChatRoom::new(id, value.name).with_participants(participants))
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: String,
    room_id: String,
    sender_id: String,
    content: String,
    message_type: String,
    reply_to: Option<String>,
    forwarded_from: Option<String>,
    file_name: Option<String>,
    created_at: Timestamp,
    read_by: Vec<String>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let parse = |err: domain::DomainError| invalid_data(err.to_string());
        let message_type: MessageType = value.message_type.parse().map_err(parse)?;
        let mut message = Message::new(
            MessageId::parse(value.id).map_err(parse)?,
            RoomId::parse(value.room_id).map_err(parse)?,
            UserId::parse(value.sender_id).map_err(parse)?,
            MessageContent::new(value.content).map_err(parse)?,
            message_type,
            value.created_at,
        )
        .with_reply_to(value.reply_to.map(MessageId::parse).transpose().map_err(parse)?)
        .with_forwarded_from(
            value
                .forwarded_from
                .map(MessageId::parse)
                .transpose()
                .map_err(parse)?,
        )
        .with_file_name(value.file_name);
        for reader in value.read_by {
            message.mark_read(UserId::parse(reader).map_err(parse)?);
        }
        Ok(message)
    }
}

const SELECT_MESSAGE: &str = r#"
    SELECT m.id, m.room_id, m.sender_id, m.content, m.message_type, m.reply_to,
           m.forwarded_from, m.file_name, m.created_at,
           COALESCE(ARRAY_AGG(r.user_id ORDER BY r.user_id) FILTER (WHERE r.user_id IS NOT NULL), '{}') AS read_by
    FROM messages m
    LEFT JOIN message_reads r ON r.message_id = m.id
    WHERE m.id = $1
    GROUP BY m.id
"#;

/// PostgreSQL 存储，同时实现消息、房间、用户仓储
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 写入或更新用户资料（资料同步和测试使用）
    pub async fn upsert_user(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, avatar, push_subscription)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                avatar = EXCLUDED.avatar,
                push_subscription = EXCLUDED.push_subscription
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.display_name)
        .bind(user.avatar.as_deref())
        .bind(user.push_subscription.as_ref().map(Json))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// 写入房间并整体替换成员列表
    pub async fn upsert_room(&self, room: &ChatRoom) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            "INSERT INTO rooms (id, name) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(room.id.as_str())
        .bind(&room.name)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query("DELETE FROM room_participants WHERE room_id = $1")
            .bind(room.id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        for (position, user_id) in room.participants.iter().enumerate() {
            sqlx::query(
                "INSERT INTO room_participants (room_id, user_id, position) VALUES ($1, $2, $3)",
            )
            .bind(room.id.as_str())
            .bind(user_id.as_str())
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for PgStorage {
    async fn create_message(&self, message: Message) -> Result<Message, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, room_id, sender_id, content, message_type, reply_to, forwarded_from, file_name, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id.as_str())
        .bind(message.room_id.as_str())
        .bind(message.sender_id.as_str())
        .bind(message.content.as_str())
        .bind(message.message_type.as_str())
        .bind(message.reply_to.as_ref().map(MessageId::as_str))
        .bind(message.forwarded_from.as_ref().map(MessageId::as_str))
        .bind(message.file_name.as_deref())
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(message)
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(SELECT_MESSAGE)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(Message::try_from).transpose()
    }

    async fn add_reader(&self, id: &MessageId, reader: &UserId) -> Result<(), RepositoryError> {
        // 消息不存在时外键约束失败，映射为 NotFound
        sqlx::query(
            "INSERT INTO message_reads (message_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(id.as_str())
        .bind(reader.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl ChatRoomRepository for PgStorage {
    async fn find_by_id(&self, id: &RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT r.id, r.name,
                   COALESCE(ARRAY_AGG(p.user_id ORDER BY p.position) FILTER (WHERE p.user_id IS NOT NULL), '{}') AS participants
            FROM rooms r
            LEFT JOIN room_participants p ON p.room_id = r.id
            WHERE r.id = $1
            GROUP BY r.id
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(ChatRoom::try_from).transpose()
    }
}

#[async_trait]
impl UserRepository for PgStorage {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, display_name, avatar, push_subscription FROM users WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }
}

#[async_trait]
impl StorageHealth for PgStorage {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
