//! 推送通知派发
//!
//! 推送是旁路：派发器从不向调用方返回错误，失败只记录日志。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{MessageType, PushSubscription};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("push delivery rejected: {0}")]
    Rejected(String),
    #[error("push transport failed: {0}")]
    Transport(String),
    #[error("push delivery timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
}

impl NotificationPayload {
    /// 文本消息带完整内容，其他类型只给出提示
    pub fn for_message(
        sender_name: &str,
        message_type: MessageType,
        content: &str,
        icon: &str,
    ) -> Self {
        let body = match message_type {
            MessageType::Text => content.to_string(),
            other => format!("Sent a {other}"),
        };
        Self {
            title: format!("New message from {sender_name}"),
            body,
            icon: icon.to_string(),
            badge: icon.to_string(),
        }
    }
}

/// 推送投递协作方：把一条负载送到一个订阅
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        target: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 未配置推送凭据
    Disabled,
    Delivered,
    /// 失败已记录，调用方照常继续
    Failed,
}

pub struct NotificationDispatcher {
    sender: Option<Arc<dyn PushSender>>,
    timeout: Duration,
    icon: String,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn PushSender>, timeout: Duration, icon: impl Into<String>) -> Self {
        Self {
            sender: Some(sender),
            timeout,
            icon: icon.into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            sender: None,
            timeout: Duration::from_secs(10),
            icon: "/icon-192x192.png".to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    pub fn icon(&self) -> &str {
        &self.icon
    }

    /// 尝试投递一次。不区分订阅过期和网络错误，统一按失败处理。
    pub async fn dispatch(
        &self,
        target: &PushSubscription,
        payload: &NotificationPayload,
    ) -> DispatchOutcome {
        let Some(sender) = &self.sender else {
            debug!("推送未配置，跳过通知");
            return DispatchOutcome::Disabled;
        };

        let result = match tokio::time::timeout(self.timeout, sender.send(target, payload)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::TimedOut(self.timeout)),
        };

        match result {
            Ok(()) => DispatchOutcome::Delivered,
            Err(err) => {
                warn!(endpoint = %target.endpoint, error = %err, "推送通知发送失败");
                DispatchOutcome::Failed
            }
        }
    }
}
