//! 消息排序策略
//!
//! 两种排序，不可混用：
//! - **活动对话**：人类消息在前（按时间戳升序），智能体消息在后（按 id 内嵌计数升序）。
//!   人类消息总是对话的开场，即使它的时间戳与上一轮刚被终止的智能体消息交错。
//! - **历史会话**：忽略时间戳，只看 id。人类消息在前，各自按 id 的数字后缀升序。
//!
//! 两者都使用稳定排序：键相等的消息保持归档读出的顺序。无法解析的 id 后缀按 0 处理。

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::store::{Message, Origin};

/// 读取会话时选择的排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptOrder {
    ActiveConversation,
    Historical,
}

impl TranscriptOrder {
    pub fn sort(self, messages: &mut [Message]) {
        match self {
            TranscriptOrder::ActiveConversation => sort_active(messages),
            TranscriptOrder::Historical => sort_historical(messages),
        }
    }
}

fn origin_rank(origin: Origin) -> u8 {
    match origin {
        Origin::Human => 0,
        Origin::Agent => 1,
    }
}

pub fn active_conversation_cmp(a: &Message, b: &Message) -> Ordering {
    let (ka, kb) = (a.key(), b.key());
    origin_rank(ka.origin)
        .cmp(&origin_rank(kb.origin))
        .then_with(|| match ka.origin {
            // 时间戳无法解析的排在最前（None < Some）
            Origin::Human => a.created_at().cmp(&b.created_at()),
            Origin::Agent => ka.sequence.cmp(&kb.sequence),
        })
}

pub fn historical_cmp(a: &Message, b: &Message) -> Ordering {
    let (ka, kb) = (a.key(), b.key());
    origin_rank(ka.origin)
        .cmp(&origin_rank(kb.origin))
        .then(ka.sequence.cmp(&kb.sequence))
}

pub fn sort_active(messages: &mut [Message]) {
    messages.sort_by(active_conversation_cmp);
}

pub fn sort_historical(messages: &mut [Message]) {
    messages.sort_by(historical_cmp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;
    use serde_json::Map;

    fn msg(id: &str, sender: Role, timestamp: &str) -> Message {
        Message {
            id: id.to_string(),
            sender,
            receiver: Role::AgentA,
            content: String::new(),
            timestamp: timestamp.to_string(),
            reply_to: None,
            kind: None,
            extra: Map::new(),
        }
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_historical_humans_first_then_counters() {
        let mut messages = vec![
            msg("user_2", Role::Human, "2024-01-01T00:00:09Z"),
            msg("msg_0001", Role::AgentA, "2024-01-01T00:00:01Z"),
            msg("msg_0002", Role::AgentB, "2024-01-01T00:00:02Z"),
            msg("user_1", Role::Human, "2024-01-01T00:00:10Z"),
        ];
        sort_historical(&mut messages);
        assert_eq!(ids(&messages), vec!["user_1", "user_2", "msg_0001", "msg_0002"]);
    }

    #[test]
    fn test_historical_ignores_timestamps() {
        let mut messages = vec![
            msg("msg_0003", Role::AgentA, "2020-01-01T00:00:00Z"),
            msg("msg_0001", Role::AgentA, "2030-01-01T00:00:00Z"),
        ];
        sort_historical(&mut messages);
        assert_eq!(ids(&messages), vec!["msg_0001", "msg_0003"]);
    }

    #[test]
    fn test_active_human_opens_regardless_of_timestamp() {
        // 人类消息的时间戳晚于所有智能体消息
        let mut messages = vec![
            msg("msg_0002", Role::AgentB, "2023-11-14T22:13:21Z"),
            msg("user_1700000000000", Role::Human, "2023-11-14T22:13:20.000Z"),
            msg("msg_0001", Role::AgentA, "2023-11-14T22:13:10Z"),
        ];
        sort_active(&mut messages);
        assert_eq!(ids(&messages), vec!["user_1700000000000", "msg_0001", "msg_0002"]);
    }

    #[test]
    fn test_active_humans_by_timestamp() {
        let mut messages = vec![
            msg("user_9", Role::Human, "2024-01-01T00:00:02Z"),
            msg("user_5", Role::Human, "2024-01-01T00:00:01Z"),
        ];
        sort_active(&mut messages);
        assert_eq!(ids(&messages), vec!["user_5", "user_9"]);
    }

    #[test]
    fn test_malformed_ids_are_counter_zero_and_stable() {
        let mut messages = vec![
            msg("msg_0001", Role::AgentA, ""),
            msg("greeting", Role::AgentA, ""),
            msg("msg_x", Role::AgentB, ""),
        ];
        TranscriptOrder::Historical.sort(&mut messages);
        assert_eq!(ids(&messages), vec!["greeting", "msg_x", "msg_0001"]);

        TranscriptOrder::ActiveConversation.sort(&mut messages);
        assert_eq!(ids(&messages), vec!["greeting", "msg_x", "msg_0001"]);
    }

    #[test]
    fn test_equal_keys_keep_archive_order() {
        let mut messages = vec![
            msg("msg_0001", Role::AgentA, "a"),
            msg("msg_1", Role::AgentB, "b"),
        ];
        sort_historical(&mut messages);
        assert_eq!(messages[0].timestamp, "a");
        assert_eq!(messages[1].timestamp, "b");
    }
}
