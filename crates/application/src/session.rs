//! 连接会话：单条实时连接的路由外壳
//!
//! 状态机 Connecting -> Established -> Terminated。入站事件通过 `dispatch` 中的
//! 显式分派表路由到各个处理函数，每个处理函数只依赖 (会话上下文, 负载)。

use std::sync::Arc;

use domain::{ConnectionId, MessageId, RepositoryError, RoomId, UserId};
use tracing::{debug, error, info, warn};

use crate::{
    broadcaster::{EventReceiver, RoomBroadcastBus},
    error::ApplicationError,
    events::{ClientEvent, ReadIntent, SendMessageIntent, SenderProfile, ServerEvent},
    presence::PresenceRegistry,
    services::MessagePipeline,
};

/// 所有连接共享的组件
pub struct ChatHub {
    pub presence: Arc<dyn PresenceRegistry>,
    pub broadcaster: Arc<RoomBroadcastBus>,
    pub pipeline: Arc<MessagePipeline>,
}

impl ChatHub {
    pub fn new(
        presence: Arc<dyn PresenceRegistry>,
        broadcaster: Arc<RoomBroadcastBus>,
        pipeline: Arc<MessagePipeline>,
    ) -> Self {
        Self {
            presence,
            broadcaster,
            pipeline,
        }
    }

    pub async fn online_count(&self) -> usize {
        self.presence.snapshot().await.len()
    }

    /// 向所有连接推送最新的在线列表
    async fn publish_online_users(&self) {
        let snapshot = self.presence.snapshot().await;
        self.broadcaster.broadcast_all(ServerEvent::OnlineUsers(snapshot));
    }
}

/// 身份服务认证后的连接身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar: Option<String>,
}

impl AuthenticatedIdentity {
    fn profile(&self) -> SenderProfile {
        SenderProfile {
            id: self.user_id.clone(),
            display_name: Some(self.display_name.clone()),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Established,
    Terminated,
}

/// 处理函数可见的会话上下文
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub connection_id: ConnectionId,
    pub identity: AuthenticatedIdentity,
}

impl SessionContext {
    /// 请求里声明的用户必须是连接本身的身份
    fn ensure_self(&self, field: &str, user_id: &UserId) -> Result<(), ApplicationError> {
        if *user_id != self.identity.user_id {
            return Err(ApplicationError::validation(
                field,
                "does not match the authenticated user",
            ));
        }
        Ok(())
    }
}

pub struct ConnectionSession {
    hub: Arc<ChatHub>,
    context: SessionContext,
    state: SessionState,
}

impl ConnectionSession {
    pub fn new(hub: Arc<ChatHub>, identity: AuthenticatedIdentity) -> Self {
        Self {
            hub,
            context: SessionContext {
                connection_id: ConnectionId::generate(),
                identity,
            },
            state: SessionState::Connecting,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.context.connection_id
    }

    pub fn identity(&self) -> &AuthenticatedIdentity {
        &self.context.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 握手完成：登记出站队列和在线状态，然后广播在线列表
    pub async fn establish(&mut self) -> Result<EventReceiver, ApplicationError> {
        if self.state != SessionState::Connecting {
            return Err(ApplicationError::validation("session", "already established"));
        }

        let ctx = &self.context;
        let receiver = self.hub.broadcaster.register(ctx.connection_id);
        self.hub
            .presence
            .set_online(ctx.identity.user_id.clone(), ctx.connection_id)
            .await;
        self.state = SessionState::Established;

        info!(
            connection_id = %ctx.connection_id,
            user_id = %ctx.identity.user_id,
            "连接已建立"
        );
        self.hub.publish_online_users().await;
        Ok(receiver)
    }

    /// 解析一帧文本并处理；格式错误只回报给本连接
    pub async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(event).await,
            Err(err) => {
                debug!(connection_id = %self.context.connection_id, error = %err, "无法解析的入站事件");
                self.reply_error(&ApplicationError::validation("event", err.to_string()));
            }
        }
    }

    pub async fn handle(&self, event: ClientEvent) {
        if self.state != SessionState::Established {
            warn!(
                connection_id = %self.context.connection_id,
                event = event.kind(),
                state = ?self.state,
                "会话未建立，忽略事件"
            );
            return;
        }

        let kind = event.kind();
        if let Err(err) = dispatch(&self.context, &self.hub, event).await {
            warn!(
                connection_id = %self.context.connection_id,
                event = kind,
                error = %err,
                "事件处理失败"
            );
            self.reply_error(&err);
        }
    }

    /// 断开连接：清理在线状态和房间成员，再向剩余连接广播在线列表。可重复调用。
    pub async fn terminate(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Terminated);
        if previous == SessionState::Terminated {
            return;
        }

        let connection_id = self.context.connection_id;
        let offline = self.hub.presence.remove(connection_id).await;
        let rooms = self.hub.broadcaster.unregister(connection_id);
        info!(
            connection_id = %connection_id,
            user_id = %self.context.identity.user_id,
            rooms_left = rooms.len(),
            went_offline = offline.len(),
            "连接已断开"
        );

        if previous == SessionState::Established {
            self.hub.publish_online_users().await;
        }
    }

    fn reply_error(&self, err: &ApplicationError) {
        let event = ServerEvent::error(err.client_message());
        if let Err(send_err) = self.hub.broadcaster.send_to(self.context.connection_id, event) {
            debug!(connection_id = %self.context.connection_id, error = %send_err, "错误事件无法投递");
        }
    }
}

/// 入站事件分派表
async fn dispatch(ctx: &SessionContext, hub: &Arc<ChatHub>, event: ClientEvent) -> Result<(), ApplicationError> {
    match event {
        ClientEvent::JoinRoom(room) => join_room(ctx, hub, room),
        ClientEvent::LeaveRoom(room) => leave_room(ctx, hub, room),
        ClientEvent::UserOnline(user) => user_online(ctx, hub, user).await,
        ClientEvent::SendMessage(intent) => send_message(ctx, hub, intent).await,
        ClientEvent::Typing(signal) => {
            relay_typing(ctx, hub, signal.room.clone(), ServerEvent::UserTyping(signal));
            Ok(())
        }
        ClientEvent::StopTyping(signal) => {
            relay_typing(ctx, hub, signal.room.clone(), ServerEvent::UserStopTyping(signal));
            Ok(())
        }
        ClientEvent::MessageRead(intent) => message_read(ctx, hub, intent).await,
    }
}

fn join_room(ctx: &SessionContext, hub: &ChatHub, room: String) -> Result<(), ApplicationError> {
    let room_id = RoomId::parse(room)?;
    let joined = hub
        .broadcaster
        .join(ctx.connection_id, room_id.clone())
        .map_err(|_| ApplicationError::not_found("connection", ctx.connection_id))?;
    info!(connection_id = %ctx.connection_id, room_id = %room_id, joined, "加入房间");
    Ok(())
}

fn leave_room(ctx: &SessionContext, hub: &ChatHub, room: String) -> Result<(), ApplicationError> {
    let room_id = RoomId::parse(room)?;
    let left = hub.broadcaster.leave(ctx.connection_id, &room_id);
    info!(connection_id = %ctx.connection_id, room_id = %room_id, left, "离开房间");
    Ok(())
}

async fn user_online(ctx: &SessionContext, hub: &ChatHub, user: String) -> Result<(), ApplicationError> {
    let user_id = UserId::parse(user)?;
    ctx.ensure_self("userId", &user_id)?;
    hub.presence.set_online(user_id, ctx.connection_id).await;
    hub.publish_online_users().await;
    Ok(())
}

/// 发送在独立任务中执行：连接中途断开时，已受理的消息仍会完成持久化和广播
async fn send_message(
    ctx: &SessionContext,
    hub: &ChatHub,
    intent: SendMessageIntent,
) -> Result<(), ApplicationError> {
    if !intent.sender.trim().is_empty() {
        ctx.ensure_self("sender", &UserId::parse(intent.sender.clone())?)?;
    }

    let pipeline = Arc::clone(&hub.pipeline);
    let author = ctx.identity.profile();
    let task = tokio::spawn(async move { pipeline.send_as(intent, Some(author)).await });
    match task.await {
        Ok(result) => result.map(|_| ()),
        Err(join_err) => {
            error!(connection_id = %ctx.connection_id, error = %join_err, "发送任务异常结束");
            Err(ApplicationError::persistence(
                "send message",
                RepositoryError::storage("send task aborted"),
            ))
        }
    }
}

fn relay_typing(ctx: &SessionContext, hub: &ChatHub, room_id: RoomId, event: ServerEvent) {
    hub.broadcaster
        .broadcast_except(&room_id, ctx.connection_id, event);
}

async fn message_read(ctx: &SessionContext, hub: &ChatHub, intent: ReadIntent) -> Result<(), ApplicationError> {
    let message_id = MessageId::parse(intent.message_id)?;
    let user_id = UserId::parse(intent.user_id)?;
    let room_id = RoomId::parse(intent.room)?;
    ctx.ensure_self("userId", &user_id)?;

    hub.pipeline.mark_read(message_id, user_id, room_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests;
