//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储、HTTP 推送网关等适配器，实现应用层定义的接口，
//! 并按配置把它们组装成共享的实时组件。

pub mod builder;
pub mod migrations;
pub mod push;
pub mod repository;

pub use builder::{build_notifier, Infrastructure, InfrastructureError, StorageBackend};
pub use migrations::MIGRATOR;
pub use push::HttpPushGateway;
pub use repository::{create_pg_pool, PgStorage};
