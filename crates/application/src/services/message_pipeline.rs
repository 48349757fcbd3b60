use std::sync::Arc;

use domain::{Message, MessageContent, MessageId, MessageType, RepositoryError, RoomId, UserId};
use tracing::{debug, error, info, warn};

use crate::{
    broadcaster::RoomBroadcastBus,
    clock::Clock,
    error::ApplicationError,
    events::{MessageReference, MessageView, ReadReceipt, SendMessageIntent, SenderProfile, ServerEvent},
    notification::{DispatchOutcome, NotificationDispatcher, NotificationPayload},
    repository::{ChatRoomRepository, MessageRepository, UserRepository},
};

pub struct MessagePipelineDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub broadcaster: Arc<RoomBroadcastBus>,
    pub notifier: Arc<NotificationDispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// 校验通过的发送请求
#[derive(Debug)]
struct ValidatedIntent {
    sender: UserId,
    room: RoomId,
    content: MessageContent,
    message_type: MessageType,
    reply_to: Option<MessageId>,
    forwarded_from: Option<MessageId>,
    file_name: Option<String>,
}

impl TryFrom<SendMessageIntent> for ValidatedIntent {
    type Error = ApplicationError;

    fn try_from(intent: SendMessageIntent) -> Result<Self, Self::Error> {
        Ok(Self {
            sender: UserId::parse(intent.sender)?,
            room: RoomId::parse(intent.room)?,
            content: MessageContent::new(intent.content)?,
            message_type: intent.message_type,
            reply_to: optional_reference(intent.reply_to)?,
            forwarded_from: optional_reference(intent.forwarded_from)?,
            file_name: intent.file_name,
        })
    }
}

fn optional_reference(value: Option<String>) -> Result<Option<MessageId>, ApplicationError> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(raw) => Ok(Some(MessageId::parse(raw)?)),
        None => Ok(None),
    }
}

/// 消息管线：校验 -> 持久化 -> 补全 -> 房间广播 -> 异步推送
///
/// 广播只发生在持久化成功之后；推送在独立任务中执行，失败不影响发送结果。
pub struct MessagePipeline {
    deps: MessagePipelineDependencies,
}

impl MessagePipeline {
    pub fn new(deps: MessagePipelineDependencies) -> Self {
        Self { deps }
    }

    pub async fn send(&self, intent: SendMessageIntent) -> Result<MessageView, ApplicationError> {
        self.send_as(intent, None).await
    }

    /// 与 `send` 相同，用户资料查不到时使用连接身份里的展示信息
    pub async fn send_as(
        &self,
        intent: SendMessageIntent,
        author: Option<SenderProfile>,
    ) -> Result<MessageView, ApplicationError> {
        let intent = ValidatedIntent::try_from(intent)?;

        let message = Message::new(
            MessageId::generate(),
            intent.room,
            intent.sender,
            intent.content,
            intent.message_type,
            self.deps.clock.now(),
        )
        .with_reply_to(intent.reply_to)
        .with_forwarded_from(intent.forwarded_from)
        .with_file_name(intent.file_name);

        let stored = self
            .deps
            .message_repository
            .create_message(message)
            .await
            .map_err(|err| {
                error!(error = %err, "消息持久化失败，放弃广播");
                ApplicationError::persistence("send message", err)
            })?;

        let view = self.enrich(&stored, author).await;

        let report = self
            .deps
            .broadcaster
            .broadcast(&stored.room_id, ServerEvent::ReceiveMessage(view.clone()));
        info!(
            room_id = %stored.room_id,
            message_id = %stored.id,
            sender_id = %stored.sender_id,
            delivered = report.delivered,
            skipped = report.skipped,
            "消息已保存并广播"
        );

        self.spawn_notifications(stored, view.sender.name().to_string());
        Ok(view)
    }

    /// 记录已读并向房间广播回执
    pub async fn mark_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<ReadReceipt, ApplicationError> {
        match self
            .deps
            .message_repository
            .add_reader(&message_id, &user_id)
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::NotFound) => {
                return Err(ApplicationError::not_found("message", &message_id));
            }
            Err(err) => {
                error!(message_id = %message_id, error = %err, "已读记录写入失败");
                return Err(ApplicationError::persistence("mark message as read", err));
            }
        }

        let receipt = ReadReceipt {
            message_id,
            user_id,
            room: room_id,
        };
        self.deps
            .broadcaster
            .broadcast(&receipt.room, ServerEvent::MessageReadUpdate(receipt.clone()));
        Ok(receipt)
    }

    async fn enrich(&self, message: &Message, author: Option<SenderProfile>) -> MessageView {
        let sender = match self.resolve_profile(&message.sender_id).await {
            profile if profile.display_name.is_some() => profile,
            profile => author
                .filter(|author| author.id == message.sender_id)
                .unwrap_or(profile),
        };
        let mut view = MessageView::new(message, sender);
        if let Some(id) = &message.reply_to {
            view.reply_to = self.resolve_reference(id).await;
        }
        if let Some(id) = &message.forwarded_from {
            view.forwarded_from = self.resolve_reference(id).await;
        }
        view
    }

    async fn resolve_profile(&self, user_id: &UserId) -> SenderProfile {
        match self.deps.user_repository.find_by_id(user_id).await {
            Ok(Some(user)) => SenderProfile {
                id: user.id,
                display_name: Some(user.display_name),
                avatar: user.avatar,
            },
            Ok(None) => {
                debug!(user_id = %user_id, "发送者资料不存在，只保留 id");
                SenderProfile::anonymous(user_id.clone())
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "查询发送者资料失败");
                SenderProfile::anonymous(user_id.clone())
            }
        }
    }

    /// 引用的消息不存在或查询失败时返回 None
    async fn resolve_reference(&self, id: &MessageId) -> Option<MessageReference> {
        let referenced = match self.deps.message_repository.find_by_id(id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(message_id = %id, "引用的消息不存在，忽略");
                return None;
            }
            Err(err) => {
                warn!(message_id = %id, error = %err, "查询引用消息失败，忽略");
                return None;
            }
        };
        let sender = self.resolve_profile(&referenced.sender_id).await;
        Some(MessageReference {
            id: referenced.id,
            content: referenced.content.into(),
            message_type: referenced.message_type,
            sender,
        })
    }

    fn spawn_notifications(&self, message: Message, sender_name: String) {
        if !self.deps.notifier.is_enabled() {
            return;
        }
        let fanout = NotificationFanout {
            room_repository: Arc::clone(&self.deps.room_repository),
            user_repository: Arc::clone(&self.deps.user_repository),
            notifier: Arc::clone(&self.deps.notifier),
        };
        tokio::spawn(async move {
            let message_id = message.id.clone();
            match fanout.run(message, sender_name).await {
                Ok(delivered) => debug!(message_id = %message_id, delivered, "离线通知处理完成"),
                Err(err) => warn!(message_id = %message_id, error = %err, "离线通知处理失败"),
            }
        });
    }
}

struct NotificationFanout {
    room_repository: Arc<dyn ChatRoomRepository>,
    user_repository: Arc<dyn UserRepository>,
    notifier: Arc<NotificationDispatcher>,
}

impl NotificationFanout {
    /// 通知房间里除发送者外登记了推送订阅的成员，返回成功投递数
    async fn run(self, message: Message, sender_name: String) -> Result<usize, ApplicationError> {
        let room = self
            .room_repository
            .find_by_id(&message.room_id)
            .await
            .map_err(|err| ApplicationError::persistence("load room participants", err))?
            .ok_or_else(|| ApplicationError::not_found("room", &message.room_id))?;

        let payload = NotificationPayload::for_message(
            &sender_name,
            message.message_type,
            message.content.as_str(),
            self.notifier.icon(),
        );

        let mut delivered = 0;
        for participant in room.participants.iter().filter(|id| **id != message.sender_id) {
            let user = match self.user_repository.find_by_id(participant).await {
                Ok(Some(user)) => user,
                Ok(None) => continue,
                Err(err) => {
                    warn!(user_id = %participant, error = %err, "查询通知对象失败，跳过");
                    continue;
                }
            };
            let Some(target) = user.notification_target() else {
                continue;
            };
            if self.notifier.dispatch(target, &payload).await == DispatchOutcome::Delivered {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}
