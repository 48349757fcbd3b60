//! Web API 层。
//!
//! 提供 Axum 路由：健康检查，以及经令牌认证后升级为 WebSocket、
//! 交给应用层连接会话处理的实时通道。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::{router, with_http_layers};
pub use state::AppState;
