//! 连接令牌校验
//!
//! 身份服务签发 HS256 令牌，这里只负责验证并取出连接身份。

use application::AuthenticatedIdentity;
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// 用户 id
    pub sub: String,
    /// 展示名
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
        }
    }

    /// 签发令牌（开发工具和测试使用，正式环境由身份服务签发）
    pub fn issue_token(
        &self,
        identity: &AuthenticatedIdentity,
        ttl: chrono::Duration,
    ) -> Result<String, ApiError> {
        let claims = Claims {
            sub: identity.user_id.to_string(),
            name: identity.display_name.clone(),
            avatar: identity.avatar.clone(),
            exp: (chrono::Utc::now() + ttl).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {err}")))
    }

    /// 验证令牌并取出连接身份
    pub fn verify_token(&self, token: &str) -> Result<AuthenticatedIdentity, ApiError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {err}")))?;

        let user_id = UserId::parse(claims.sub)
            .map_err(|_| ApiError::unauthorized("Invalid token subject"))?;
        Ok(AuthenticatedIdentity {
            user_id,
            display_name: claims.name,
            avatar: claims.avatar,
        })
    }

    /// 优先读取 `Authorization: Bearer`，浏览器 WebSocket 无法设置请求头时退回 `?token=`
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<AuthenticatedIdentity, ApiError> {
        let header_token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        let token = header_token
            .or(query_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Missing connection token"))?;

        self.verify_token(token)
    }
}
