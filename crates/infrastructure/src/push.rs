//! HTTP 推送网关适配器
//!
//! 把 `{subscription, payload}` POST 给配置的网关，由网关完成 Web Push 签名和投递。

use std::time::Duration;

use application::{DeliveryError, NotificationPayload, PushSender};
use async_trait::async_trait;
use domain::PushSubscription;
use serde::Serialize;
use tracing::debug;

#[derive(Serialize)]
struct PushRequest<'a> {
    subscription: &'a PushSubscription,
    payload: &'a NotificationPayload,
}

pub struct HttpPushGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpPushGateway {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl PushSender for HttpPushGateway {
    async fn send(
        &self,
        target: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&PushRequest {
                subscription: target,
                payload,
            })
            .send()
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(endpoint = %target.endpoint, "推送已提交到网关");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected(format!("gateway returned {status}: {body}")))
    }
}
