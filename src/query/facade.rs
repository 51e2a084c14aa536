//! 查询门面
//!
//! 每个视图都只由注册表、消息仓库与协调器组合而成。读取运行状态前总是先 reconcile。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::ideas::{IdeaBoard, IdeaRepository};
use super::percent;
use crate::core::Result;
use crate::ordering::TranscriptOrder;
use crate::runtime::RunCoordinator;
use crate::session::{Session, SessionRegistry, SessionSummary};
use crate::store::{Message, MessageStore, Role, TurnState};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsOverview {
    pub sessions: Vec<SessionSummary>,
    pub active_session_id: Option<String>,
}

/// 单个会话：元数据 + 历史排序的消息 + 轮次状态
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub messages: Vec<Message>,
    pub state: Option<TurnState>,
}

/// 活动会话的实时消息流
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveFeed {
    pub messages: Vec<Message>,
    pub state: Option<TurnState>,
    pub active_session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub running_session_id: Option<String>,
    pub active_session_id: Option<String>,
    /// 正在运行的不是活动会话（操作者在预览别的会话）
    pub running_elsewhere: bool,
    /// 运行中的会话已被删除
    pub running_unidentified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStats {
    pub session_count: usize,
    pub total_messages: usize,
    pub messages_by_sender: BTreeMap<String, usize>,
    pub human_messages: usize,
    /// 人类消息占比（%）
    pub human_share: u32,
}

pub struct QueryFacade {
    registry: Arc<SessionRegistry>,
    store: MessageStore,
    coordinator: Arc<RunCoordinator>,
    ideas: IdeaRepository,
}

impl QueryFacade {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: MessageStore,
        coordinator: Arc<RunCoordinator>,
        ideas: IdeaRepository,
    ) -> Self {
        Self {
            registry,
            store,
            coordinator,
            ideas,
        }
    }

    pub async fn sessions_overview(&self) -> Result<SessionsOverview> {
        Ok(SessionsOverview {
            sessions: self.registry.list().await?,
            active_session_id: self.registry.active_session_id().await?,
        })
    }

    pub async fn session_detail(&self, id: &str) -> Result<SessionDetail> {
        let session = self.registry.get(id).await?;
        let mut messages = self.store.read_all(id).await?;
        TranscriptOrder::Historical.sort(&mut messages);
        let state = self.store.read_turn_state(id).await?;
        Ok(SessionDetail {
            session,
            messages,
            state,
        })
    }

    pub async fn live_feed(&self) -> Result<LiveFeed> {
        let Some(id) = self.registry.active_session_id().await? else {
            return Ok(LiveFeed::default());
        };
        let mut messages = self.store.read_all(&id).await?;
        TranscriptOrder::ActiveConversation.sort(&mut messages);
        let state = self.store.read_turn_state(&id).await?;
        Ok(LiveFeed {
            messages,
            state,
            active_session_id: Some(id),
        })
    }

    pub async fn live_status(&self) -> Result<LiveStatus> {
        let running_session_id = self.coordinator.running_session_id().await?;
        let active_session_id = self.registry.active_session_id().await?;
        let (running_elsewhere, running_unidentified) = match &running_session_id {
            Some(running) => (
                active_session_id.as_deref() != Some(running.as_str()),
                !self.registry.exists(running).await,
            ),
            None => (false, false),
        };
        Ok(LiveStatus {
            running_session_id,
            active_session_id,
            running_elsewhere,
            running_unidentified,
        })
    }

    pub async fn conversation_stats(&self) -> Result<ConversationStats> {
        let sessions = self.registry.list().await?;
        let mut stats = ConversationStats {
            session_count: sessions.len(),
            ..ConversationStats::default()
        };
        for summary in &sessions {
            for message in self.store.read_all(&summary.session.id).await? {
                stats.total_messages += 1;
                if message.sender == Role::Human {
                    stats.human_messages += 1;
                }
                *stats
                    .messages_by_sender
                    .entry(message.sender.to_string())
                    .or_default() += 1;
            }
        }
        stats.human_share = percent(stats.human_messages, stats.total_messages);
        Ok(stats)
    }

    pub async fn idea_board(&self) -> Result<IdeaBoard> {
        self.ideas.load_board().await
    }
}
