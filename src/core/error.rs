//! 错误类型
//!
//! 用户可修正的前置条件错误（NotFound / NoActiveSession / EmptyMessage）与可重试的存储错误分开，
//! 供 CLI 与 Web 层映射为不同的返回码。「声明过期」不是错误：由协调器记录日志并自愈。

use thiserror::Error;

/// duet 核心操作可能返回的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DuetError {
    #[error("Session not found: {id}")]
    NotFound { id: String },

    /// 向不存在的会话归档写入消息
    #[error("Unknown session: {id}")]
    UnknownSession { id: String },

    #[error("No active session. Create a session first.")]
    NoActiveSession,

    #[error("Message required")]
    EmptyMessage,

    /// 读写持久化状态失败（可重试）
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 指针 CAS 失败：磁盘上的版本已被其他写者推进
    #[error("Conflict on {key}: expected version {expected}, found {actual}")]
    Conflict {
        key: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("Config error: {0}")]
    Config(String),
}

impl DuetError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn unknown_session(id: impl Into<String>) -> Self {
        Self::UnknownSession { id: id.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UnknownSession { .. })
    }

    /// 操作者改正输入即可解决的错误
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::UnknownSession { .. }
                | Self::NoActiveSession
                | Self::EmptyMessage
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<std::io::Error> for DuetError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(format!("{} (kind: {:?})", err, err.kind()))
    }
}

impl From<serde_json::Error> for DuetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for DuetError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DuetError>;
