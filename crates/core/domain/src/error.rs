use thiserror::Error;

/// 记录模型构造错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid time filter: {0}")]
    InvalidTimeFilter(String),
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
}
