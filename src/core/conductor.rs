//! Conductor：面向操作者的统一入口
//!
//! 把注册表、消息仓库、指针、协调器与查询门面组装在一起；CLI 与 Web 都只依赖这一层。
//! 会话类操作在这里发出事件，运行类事件由协调器自己发出。

use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::events::{ConductorEvent, EventBus};
use super::Result;
use crate::config::{AppConfig, StorageSection};
use crate::query::{
    ConversationStats, IdeaBoard, IdeaRepository, LiveFeed, LiveStatus, QueryFacade, SessionDetail,
    SessionsOverview,
};
use crate::runtime::{ProcessGroups, RunCoordinator, RunSettings, RunState, TmuxProcessGroups};
use crate::session::{Session, SessionRegistry};
use crate::store::{Message, MessageStore, PointerStore};

pub struct Conductor {
    registry: Arc<SessionRegistry>,
    coordinator: Arc<RunCoordinator>,
    query: QueryFacade,
    events: EventBus,
}

impl Conductor {
    /// 以 tmux 作为进程组协作者
    pub fn from_config(cfg: &AppConfig) -> Self {
        let groups: Arc<dyn ProcessGroups> = Arc::new(TmuxProcessGroups::new(cfg.runtime.clone()));
        Self::new(&cfg.storage, groups, RunSettings::from(&cfg.runtime))
    }

    pub fn new(storage: &StorageSection, groups: Arc<dyn ProcessGroups>, settings: RunSettings) -> Self {
        let events = EventBus::default();
        let store = MessageStore::new(&storage.messages_dir);
        let pointers = Arc::new(PointerStore::new(&storage.messages_dir));
        let registry = Arc::new(SessionRegistry::new(store.clone(), pointers.clone()));
        let coordinator = Arc::new(RunCoordinator::new(
            registry.clone(),
            store.clone(),
            pointers,
            groups,
            settings,
            events.clone(),
        ));
        let query = QueryFacade::new(
            registry.clone(),
            store,
            coordinator.clone(),
            IdeaRepository::new(&storage.ideas_dir),
        );
        Self {
            registry,
            coordinator,
            query,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConductorEvent> {
        self.events.subscribe()
    }

    /// 事件流，`token` 取消时结束
    pub fn event_stream(&self, token: CancellationToken) -> impl Stream<Item = ConductorEvent> + Send + 'static {
        self.events.stream_until(token)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    // ---- 会话 ----

    pub async fn list_sessions(&self) -> Result<SessionsOverview> {
        self.query.sessions_overview().await
    }

    pub async fn create_session(&self, name: Option<&str>) -> Result<Session> {
        let session = self.registry.create(name).await?;
        self.events.emit(ConductorEvent::SessionCreated {
            session_id: session.id.clone(),
            name: session.name.clone(),
        });
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<SessionDetail> {
        self.query.session_detail(id).await
    }

    pub async fn activate_session(&self, id: &str) -> Result<()> {
        self.registry.activate(id).await?;
        self.events.emit(ConductorEvent::SessionActivated {
            session_id: id.to_string(),
        });
        Ok(())
    }

    /// 删除会话；不存在的 id 也返回成功。返回被删的是否为活动会话
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let was_active = self.registry.delete(id).await?;
        self.events.emit(ConductorEvent::SessionDeleted {
            session_id: id.to_string(),
            was_active,
        });
        Ok(was_active)
    }

    // ---- 运行 ----

    pub async fn reconcile(&self) -> Result<RunState> {
        self.coordinator.reconcile().await
    }

    pub async fn running_session_id(&self) -> Result<Option<String>> {
        self.coordinator.running_session_id().await
    }

    pub async fn start(&self) -> Result<String> {
        self.coordinator.start().await
    }

    pub async fn send(&self, text: &str) -> Result<Message> {
        self.coordinator.send(text).await
    }

    pub async fn stop(&self) {
        self.coordinator.stop().await
    }

    // ---- 查询 ----

    pub async fn live_status(&self) -> Result<LiveStatus> {
        self.query.live_status().await
    }

    pub async fn live_feed(&self) -> Result<LiveFeed> {
        self.query.live_feed().await
    }

    pub async fn conversation_stats(&self) -> Result<ConversationStats> {
        self.query.conversation_stats().await
    }

    pub async fn idea_board(&self) -> Result<IdeaBoard> {
        self.query.idea_board().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockProcessGroups;
    use std::time::Duration;
    use tempfile::TempDir;

    fn conductor(dir: &TempDir) -> Conductor {
        let storage = StorageSection {
            messages_dir: dir.path().join("messages"),
            ideas_dir: dir.path().join("ideas"),
        };
        let settings = RunSettings {
            kickoff_delay: Duration::ZERO,
            ..RunSettings::default()
        };
        Conductor::new(&storage, Arc::new(MockProcessGroups::default()), settings)
    }

    #[tokio::test]
    async fn test_session_events_are_emitted() {
        let dir = TempDir::new().unwrap();
        let c = conductor(&dir);
        let mut rx = c.subscribe();

        let s = c.create_session(Some("demo")).await.unwrap();
        c.activate_session(&s.id).await.unwrap();
        c.delete_session(&s.id).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ConductorEvent::SessionCreated {
                session_id: s.id.clone(),
                name: "demo".into()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ConductorEvent::SessionActivated { session_id: s.id.clone() }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ConductorEvent::SessionDeleted {
                session_id: s.id,
                was_active: true
            }
        );
    }

    #[tokio::test]
    async fn test_activate_unknown_emits_nothing() {
        let dir = TempDir::new().unwrap();
        let c = conductor(&dir);
        let mut rx = c.subscribe();
        assert!(c.activate_session("session_404").await.unwrap_err().is_not_found());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_emits_message_sent() {
        let dir = TempDir::new().unwrap();
        let c = conductor(&dir);
        let s = c.create_session(None).await.unwrap();
        let mut rx = c.subscribe();

        let msg = c.send("hi").await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ConductorEvent::MessageSent {
                session_id: s.id,
                message_id: msg.id
            }
        );
    }
}
