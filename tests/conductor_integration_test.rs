//! Conductor 集成测试：临时目录 + 内存进程组

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use duet::config::StorageSection;
    use duet::query::LiveStatus;
    use duet::runtime::{MockProcessGroups, RunSettings, RunState};
    use duet::store::{Message, MessageStore, Role};
    use duet::{Conductor, DuetError};
    use serde_json::Map;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        mock: Arc<MockProcessGroups>,
        conductor: Conductor,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = StorageSection {
                messages_dir: dir.path().join("messages"),
                ideas_dir: dir.path().join("ideas"),
            };
            let mock = Arc::new(MockProcessGroups::default());
            let settings = RunSettings {
                kickoff_delay: Duration::ZERO,
                ..RunSettings::default()
            };
            let conductor = Conductor::new(&storage, mock.clone(), settings);
            Self { dir, mock, conductor }
        }

        fn store(&self) -> MessageStore {
            MessageStore::new(self.dir.path().join("messages"))
        }

        /// 模拟 watcher 写入的智能体消息
        async fn agent_message(&self, session_id: &str, counter: u32, sender: Role, timestamp: &str) {
            let receiver = if sender == Role::AgentA { Role::AgentB } else { Role::AgentA };
            let msg = Message {
                id: format!("msg_{:04}", counter),
                sender,
                receiver,
                content: format!("turn {}", counter),
                timestamp: timestamp.to_string(),
                reply_to: None,
                kind: Some("message".to_string()),
                extra: Map::new(),
            };
            self.store().append(session_id, &msg).await.unwrap();
        }
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_back_to_back_creates_are_distinct_and_last_is_active() {
        let h = Harness::new();
        let a = h.conductor.create_session(None).await.unwrap();
        let b = h.conductor.create_session(None).await.unwrap();
        assert_ne!(a.id, b.id);

        let overview = h.conductor.list_sessions().await.unwrap();
        assert_eq!(overview.active_session_id, Some(b.id.clone()));
        assert_eq!(overview.sessions.len(), 2);
        assert_eq!(overview.sessions[0].session.id, b.id);
    }

    #[tokio::test]
    async fn test_delete_active_vs_other() {
        let h = Harness::new();
        let a = h.conductor.create_session(Some("a")).await.unwrap();
        let b = h.conductor.create_session(Some("b")).await.unwrap();

        assert!(!h.conductor.delete_session(&a.id).await.unwrap());
        assert_eq!(h.conductor.registry().active_session_id().await.unwrap(), Some(b.id.clone()));

        assert!(h.conductor.delete_session(&b.id).await.unwrap());
        assert_eq!(h.conductor.registry().active_session_id().await.unwrap(), None);

        // 删除不存在的 id 也成功
        h.conductor.delete_session("session_0").await.unwrap();
        assert!(h.conductor.get_session(&b.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_send_empty_is_fully_atomic() {
        let h = Harness::new();
        let s = h.conductor.create_session(None).await.unwrap();
        h.mock.clear_calls();

        assert_eq!(h.conductor.send("").await.unwrap_err(), DuetError::EmptyMessage);
        assert!(h.mock.calls().is_empty());
        assert_eq!(h.store().count(&s.id).await.unwrap(), 0);
        assert_eq!(h.conductor.running_session_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_preconditions_without_active_session() {
        let h = Harness::new();
        assert_eq!(h.conductor.start().await.unwrap_err(), DuetError::NoActiveSession);
        assert_eq!(h.conductor.send("hi").await.unwrap_err(), DuetError::NoActiveSession);
        h.conductor.stop().await;
        assert_eq!(h.conductor.live_status().await.unwrap(), LiveStatus::default());
    }

    #[tokio::test]
    async fn test_start_stop_sequences_settle_on_last_declared_or_none() {
        let h = Harness::new();
        let a = h.conductor.create_session(Some("a")).await.unwrap();

        h.conductor.start().await.unwrap();
        assert_eq!(h.conductor.running_session_id().await.unwrap(), None);

        h.conductor.send("hello").await.unwrap();
        assert_eq!(h.conductor.running_session_id().await.unwrap(), Some(a.id.clone()));

        h.conductor.start().await.unwrap();
        h.conductor.stop().await;
        h.conductor.stop().await;
        assert_eq!(h.conductor.running_session_id().await.unwrap(), None);

        let b = h.conductor.create_session(Some("b")).await.unwrap();
        h.conductor.send("again").await.unwrap();
        h.conductor.start().await.unwrap();
        assert_eq!(h.conductor.running_session_id().await.unwrap(), Some(b.id));
    }

    #[tokio::test]
    async fn test_running_elsewhere_and_unidentified() {
        let h = Harness::new();
        let a = h.conductor.create_session(Some("a")).await.unwrap();
        h.conductor.send("hello").await.unwrap();
        let b = h.conductor.create_session(Some("b")).await.unwrap();

        let status = h.conductor.live_status().await.unwrap();
        assert_eq!(status.running_session_id, Some(a.id.clone()));
        assert_eq!(status.active_session_id, Some(b.id.clone()));
        assert!(status.running_elsewhere);
        assert!(!status.running_unidentified);

        h.conductor.delete_session(&a.id).await.unwrap();
        let status = h.conductor.live_status().await.unwrap();
        assert!(status.running_unidentified);

        // 进程组自然结束后声明被自愈清除，不再报告已删除的会话
        h.mock.crash();
        let status = h.conductor.live_status().await.unwrap();
        assert_eq!(status.running_session_id, None);
        assert!(!status.running_unidentified);
    }

    #[tokio::test]
    async fn test_status_polled_while_send_is_launching() {
        let h = Harness::new();
        let s = h.conductor.create_session(None).await.unwrap();
        h.mock.hold_launches(true);

        let (sent, during) = tokio::join!(h.conductor.send("hello"), async {
            h.mock.launch_started().await;
            let status = h.conductor.live_status().await.unwrap();
            h.mock.release_launch();
            status
        });
        sent.unwrap();

        assert_eq!(during.running_session_id, Some(s.id.clone()));
        assert!(!during.running_elsewhere);
        let status = h.conductor.live_status().await.unwrap();
        assert_eq!(status.running_session_id, Some(s.id.clone()));
        assert!(h.mock.live().contains("watcher"));

        // 转换结束后自愈照常生效
        h.mock.crash();
        assert_eq!(h.conductor.running_session_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reconcile_after_crash() {
        let h = Harness::new();
        let s = h.conductor.create_session(None).await.unwrap();
        h.conductor.send("hello").await.unwrap();
        let mut rx = h.conductor.subscribe();

        h.mock.crash();
        assert_eq!(
            h.conductor.reconcile().await.unwrap(),
            RunState::DeclaredStale { session_id: s.id.clone() }
        );
        assert_eq!(h.conductor.running_session_id().await.unwrap(), None);
        assert!(matches!(
            rx.recv().await.unwrap(),
            duet::ConductorEvent::DeclarationRepaired { session_id, .. } if session_id == s.id
        ));
    }

    #[tokio::test]
    async fn test_live_feed_and_history_orderings() {
        let h = Harness::new();
        let s = h.conductor.create_session(None).await.unwrap();
        // 上一轮残留的智能体消息时间戳早于人类消息
        h.agent_message(&s.id, 2, Role::AgentB, "2020-01-01T00:00:02Z").await;
        h.agent_message(&s.id, 1, Role::AgentA, "2020-01-01T00:00:01Z").await;
        let human = h.conductor.send("new theme").await.unwrap();

        let feed = h.conductor.live_feed().await.unwrap();
        assert_eq!(feed.active_session_id, Some(s.id.clone()));
        assert_eq!(ids(&feed.messages), vec![human.id.as_str(), "msg_0001", "msg_0002"]);
        assert_eq!(feed.state.unwrap().current_turn, Role::AgentA);

        let detail = h.conductor.get_session(&s.id).await.unwrap();
        assert_eq!(ids(&detail.messages), vec![human.id.as_str(), "msg_0001", "msg_0002"]);
        assert_eq!(detail.session.id, s.id);
    }

    #[tokio::test]
    async fn test_live_feed_without_active_session_is_empty() {
        let h = Harness::new();
        let feed = h.conductor.live_feed().await.unwrap();
        assert!(feed.messages.is_empty());
        assert!(feed.state.is_none());
        assert!(feed.active_session_id.is_none());
    }

    #[tokio::test]
    async fn test_conversation_stats() {
        let h = Harness::new();
        assert_eq!(h.conductor.conversation_stats().await.unwrap().human_share, 0);

        let s = h.conductor.create_session(None).await.unwrap();
        h.conductor.send("theme").await.unwrap();
        h.agent_message(&s.id, 1, Role::AgentA, "2024-01-01T00:00:01Z").await;
        h.agent_message(&s.id, 2, Role::AgentB, "2024-01-01T00:00:02Z").await;
        h.conductor.create_session(None).await.unwrap();

        let stats = h.conductor.conversation_stats().await.unwrap();
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.human_messages, 1);
        assert_eq!(stats.human_share, 33);
        assert_eq!(stats.messages_by_sender.get("claude1"), Some(&1));
        assert_eq!(stats.messages_by_sender.get("user"), Some(&1));
    }

    #[tokio::test]
    async fn test_append_to_unknown_session() {
        let h = Harness::new();
        let msg = Message::human("user_1", "x", chrono::Utc::now());
        let err = h.store().append("session_missing", &msg).await.unwrap_err();
        assert_eq!(err, DuetError::unknown_session("session_missing"));
    }
}
