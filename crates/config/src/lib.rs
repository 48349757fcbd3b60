//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 消息存储（PostgreSQL，可选）
//! - 连接令牌校验
//! - 推送通知网关
//! - 实时连接参数
//!
//! 加载顺序：内置默认值 -> `APP_CONFIG_FILE` 指定的文件 -> `APP_` 前缀环境变量。

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 连接令牌配置
    pub jwt: JwtConfig,
    /// 推送通知配置
    #[serde(default)]
    pub push: PushConfig,
    /// 实时连接配置
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 数据库配置
///
/// `url` 为空时使用进程内存储，仅适合开发和测试。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

/// 推送通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub icon: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            api_key: None,
            timeout_seconds: 10,
            icon: "/icon-192x192.png".to_string(),
        }
    }
}

impl PushConfig {
    /// 网关地址和密钥都存在时才算启用推送
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let url = self.gateway_url.as_deref().filter(|s| !s.trim().is_empty())?;
        let key = self.api_key.as_deref().filter(|s| !s.trim().is_empty())?;
        Some((url, key))
    }
}

/// 实时连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// 单个连接的待发送事件队列容量，队列满时丢弃该连接的事件
    pub connection_buffer: usize,
    /// 收到关闭信号后强制退出前的等待时间
    pub shutdown_grace_seconds: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            connection_buffer: 256,
            shutdown_grace_seconds: 30,
        }
    }
}

impl Default for AppConfig {
    /// 默认配置仅用于开发环境，其中的 JWT 密钥无法通过 `validate`
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                cors_origins: vec!["*".to_string()],
            },
            database: DatabaseConfig::default(),
            jwt: JwtConfig {
                secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
            },
            push: PushConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl AppConfig {
    /// 按优先级加载配置：默认值 -> 可选文件 (APP_CONFIG_FILE) -> 环境变量 (APP_*)
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            fig = merge_file(fig, &path);
        }
        fig = fig.merge(Env::prefixed("APP_").split("__"));
        Self::from_figment(fig)
    }

    /// 从已组装好的 figment 提取并校验配置
    pub fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = fig.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::InvalidServerConfig(
                "host cannot be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerPort(
                "port must be greater than 0".to_string(),
            ));
        }

        if let Some(url) = &self.database.url {
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(ConfigError::InvalidDatabaseUrl(
                    "database url must use the postgres scheme".to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "max connections must be greater than 0".to_string(),
                ));
            }
        }

        // HS256 密钥至少 256 位
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // 公开的开发密钥可被任何人用来伪造连接令牌
        if is_development_secret(&self.jwt.secret) {
            return Err(ConfigError::InvalidJwtSecret(
                "development JWT secret is not allowed, set APP_JWT__SECRET".to_string(),
            ));
        }

        if self.push.timeout_seconds == 0 {
            return Err(ConfigError::InvalidPushConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }

        if self.realtime.connection_buffer == 0 {
            return Err(ConfigError::InvalidRealtimeConfig(
                "connection buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// 用于日志输出的脱敏描述
    pub fn sanitize(&self) -> String {
        format!(
            "server={} database={} push={} connection_buffer={}",
            self.bind_address(),
            if self.database.url.is_some() {
                "postgres"
            } else {
                "memory"
            },
            if self.push.credentials().is_some() {
                "enabled"
            } else {
                "disabled"
            },
            self.realtime.connection_buffer,
        )
    }
}

fn is_development_secret(secret: &str) -> bool {
    ["dev-secret", "not-for-production", "please-change"]
        .iter()
        .any(|marker| secret.contains(marker))
}

fn merge_file(fig: Figment, path: &str) -> Figment {
    if path.ends_with(".yml") || path.ends_with(".yaml") {
        fig.merge(Yaml::file(path))
    } else if path.ends_with(".json") {
        fig.merge(Json::file(path))
    } else {
        fig.merge(Toml::file(path))
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Extract(#[from] Box<figment::Error>),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server port: {0}")]
    InvalidServerPort(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid push configuration: {0}")]
    InvalidPushConfig(String),
    #[error("Invalid realtime configuration: {0}")]
    InvalidRealtimeConfig(String),
}
