//! 归档消息与轮次状态
//!
//! 磁盘记录由外部 watcher 与本进程共同写入，字段集合并不固定：
//! 结构体只声明必需的核心字段，其余字段原样保留在 `extra` 中，读取时校验、不盲信。

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 人类操作者消息的 id 前缀
pub const HUMAN_ID_PREFIX: &str = "user_";

/// 参与者：人类操作者或两个固定的 Agent 角色（线上名称沿用 watcher 的写法）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    Human,
    #[serde(rename = "claude1")]
    AgentA,
    #[serde(rename = "claude2")]
    AgentB,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "user",
            Role::AgentA => "claude1",
            Role::AgentB => "claude2",
        }
    }

    pub fn is_agent(&self) -> bool {
        !matches!(self, Role::Human)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条归档消息，写入后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: Role,
    pub receiver: Role,
    pub content: String,
    /// RFC 3339 时间戳；保留原始字符串，解析失败不影响读取
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// 未声明的扩展字段
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// 构造人类操作者发给 AgentA 的开场消息
    pub fn human(id: impl Into<String>, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            sender: Role::Human,
            receiver: Role::AgentA,
            content: content.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            reply_to: None,
            kind: Some("message".to_string()),
            extra: Map::new(),
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::parse(&self.id)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// 消息来源（由 id 前缀判定，而非 sender 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Human,
    Agent,
}

/// 从消息 id 中解析出的排序键：来源 + 内嵌的数字后缀
///
/// `user_1700000000000` → (Human, 1700000000000)，`msg_0002` → (Agent, 2)。
/// 没有数字后缀（或溢出）的 id 一律视为 0，不报错。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub origin: Origin,
    pub sequence: u64,
}

impl MessageKey {
    pub fn parse(id: &str) -> Self {
        let origin = if id.starts_with(HUMAN_ID_PREFIX) {
            Origin::Human
        } else {
            Origin::Agent
        };
        let sequence = numeric_suffix(id).unwrap_or(0);
        Self { origin, sequence }
    }
}

fn numeric_suffix(id: &str) -> Option<u64> {
    let digits = id.rsplit(|c: char| !c.is_ascii_digit()).next()?;
    digits.parse().ok()
}

/// 每个会话一份的可变轮次状态；由外部 watcher 维护，本进程只在创建会话时写入初始值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnState {
    pub current_turn: Role,
    #[serde(default)]
    pub last_message_id: Option<String>,
    #[serde(default)]
    pub message_counter: u64,
    #[serde(default)]
    pub pending_reply_to: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TurnState {
    /// 新会话：轮到 AgentA，计数为 0
    pub fn initial() -> Self {
        Self {
            current_turn: Role::AgentA,
            last_message_id: None,
            message_counter: 0,
            pending_reply_to: None,
            extra: Map::new(),
        }
    }
}

impl Default for TurnState {
    fn default() -> Self {
        Self::initial()
    }
}
