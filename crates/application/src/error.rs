use domain::{DomainError, RepositoryError};
use thiserror::Error;

/// 应用层错误
///
/// 只有阻止消息落库的失败才会回报给发起连接；
/// 推送和单连接投递失败在各自模块内部吞掉，不会出现在这里。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("persistence failed while trying to {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: RepositoryError,
    },
}

impl ApplicationError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// `operation` 以动词短语描述失败的操作，例如 "send message"
    pub fn persistence(operation: &'static str, source: RepositoryError) -> Self {
        Self::Persistence { operation, source }
    }

    /// 发送给客户端 `error` 事件的文本，不包含存储细节
    pub fn client_message(&self) -> String {
        match self {
            ApplicationError::Validation { field, reason } => {
                format!("Invalid request: {field} {reason}")
            }
            ApplicationError::NotFound { resource, .. } => format!("{resource} not found"),
            ApplicationError::Persistence { operation, .. } => format!("Failed to {operation}"),
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument { field, reason } => Self::Validation { field, reason },
        }
    }
}
