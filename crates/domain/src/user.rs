use crate::value_objects::UserId;

/// 浏览器推送订阅描述，核心只负责转交给推送网关
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<i64>,
    pub keys: PushKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub avatar: Option<String>,
    #[serde(skip_serializing)] // 推送订阅不暴露给客户端
    pub push_subscription: Option<PushSubscription>,
}

impl User {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar: None,
            push_subscription: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    pub fn with_push_subscription(mut self, subscription: PushSubscription) -> Self {
        self.push_subscription = Some(subscription);
        self
    }

    /// 用户登记的推送目标（没有订阅时不会收到离线通知）
    pub fn notification_target(&self) -> Option<&PushSubscription> {
        self.push_subscription.as_ref()
    }
}
