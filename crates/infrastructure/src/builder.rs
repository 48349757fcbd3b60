use std::sync::Arc;
use std::time::Duration;

use application::{
    ChatHub, ChatRoomRepository, MemoryPresenceRegistry, MemoryStorage, MessagePipeline,
    MessagePipelineDependencies, MessageRepository, NotificationDispatcher, RoomBroadcastBus,
    StorageHealth, SystemClock, UserRepository,
};
use config::AppConfig;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    migrations::MIGRATOR,
    push::HttpPushGateway,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("push gateway client error: {0}")]
    PushClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// 根据配置组装好的适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub backend: StorageBackend,
    pub messages: Arc<dyn MessageRepository>,
    pub rooms: Arc<dyn ChatRoomRepository>,
    pub users: Arc<dyn UserRepository>,
    pub health: Arc<dyn StorageHealth>,
    pub notifier: Arc<NotificationDispatcher>,
}

impl Infrastructure {
    /// 配置了数据库地址时连接 PostgreSQL 并执行迁移，否则使用进程内存储
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let notifier = Arc::new(build_notifier(config)?);

        match &config.database.url {
            Some(url) => {
                let pool = create_pg_pool(url, config.database.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                info!("PostgreSQL 已连接，迁移完成");
                let storage = Arc::new(PgStorage::new(pool));
                Ok(Self {
                    backend: StorageBackend::Postgres,
                    messages: storage.clone(),
                    rooms: storage.clone(),
                    users: storage.clone(),
                    health: storage,
                    notifier,
                })
            }
            None => {
                warn!("未配置数据库，使用进程内存储，重启后数据丢失");
                Ok(Self::in_memory(Arc::new(MemoryStorage::new()), notifier))
            }
        }
    }

    pub fn in_memory(storage: Arc<MemoryStorage>, notifier: Arc<NotificationDispatcher>) -> Self {
        Self {
            backend: StorageBackend::Memory,
            messages: storage.clone(),
            rooms: storage.clone(),
            users: storage.clone(),
            health: storage,
            notifier,
        }
    }

    /// 用这些适配器组装所有连接共享的实时组件
    pub fn build_hub(&self, connection_buffer: usize) -> Arc<ChatHub> {
        let broadcaster = Arc::new(RoomBroadcastBus::new(connection_buffer));
        let pipeline = MessagePipeline::new(MessagePipelineDependencies {
            message_repository: Arc::clone(&self.messages),
            room_repository: Arc::clone(&self.rooms),
            user_repository: Arc::clone(&self.users),
            broadcaster: Arc::clone(&broadcaster),
            notifier: Arc::clone(&self.notifier),
            clock: Arc::new(SystemClock),
        });
        Arc::new(ChatHub::new(
            Arc::new(MemoryPresenceRegistry::new()),
            broadcaster,
            Arc::new(pipeline),
        ))
    }
}

/// 网关地址和密钥缺一不可，否则推送为空操作
pub fn build_notifier(config: &AppConfig) -> Result<NotificationDispatcher, InfrastructureError> {
    let Some((url, key)) = config.push.credentials() else {
        info!("未配置推送凭据，离线通知关闭");
        return Ok(NotificationDispatcher::disabled());
    };
    let timeout = Duration::from_secs(config.push.timeout_seconds);
    let gateway = HttpPushGateway::new(url, key, timeout)?;
    info!(gateway = %url, "离线通知已启用");
    Ok(NotificationDispatcher::new(
        Arc::new(gateway),
        timeout,
        config.push.icon.clone(),
    ))
}
