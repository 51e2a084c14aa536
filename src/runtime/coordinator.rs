//! 运行协调器（Run Coordinator）
//!
//! 协调三份各自可写、都可能因崩溃而失真的事实：活动会话指针、运行声明（running_session.json）、
//! 以及进程组是否真的存活。声明只是一个文件，可以比它描述的进程活得更久，
//! 因此任何读取运行状态的路径都先调用 [`RunCoordinator::reconcile`] 与实际进程交叉核对。
//!
//! 状态机作用于整个进程（而非单个会话）：
//! - `Idle`：没有声明
//! - `DeclaredLive`：有声明且 watcher 进程组存活
//! - `DeclaredStale`：有声明但进程组已不在，reconcile 会当场清除声明
//!
//! start / send / stop 在进程内由同一把锁串行化，reconcile 只在拿到这把锁时才修复；
//! 跨进程的并发按 last-writer-wins 处理。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use super::process::ProcessGroups;
use crate::config::RuntimeSection;
use crate::core::events::{ConductorEvent, EventBus};
use crate::core::{DuetError, Result};
use crate::session::SessionRegistry;
use crate::store::{Message, MessageStore, PointerKey, PointerStore};

/// 对 CAS 冲突的重试次数上限
const RECONCILE_ATTEMPTS: usize = 3;

/// 协调器需要的运行参数（取自 [runtime] 配置段）
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub agent_a: String,
    pub watcher: String,
    /// 一次对话的全部进程组，start/send/stop 时逐个终止
    pub groups: Vec<String>,
    pub kickoff_delay: Duration,
    pub kickoff_instruction: String,
}

impl From<&RuntimeSection> for RunSettings {
    fn from(rt: &RuntimeSection) -> Self {
        Self {
            agent_a: rt.agent_a.clone(),
            watcher: rt.watcher.clone(),
            groups: rt.group_names().iter().map(|s| s.to_string()).collect(),
            kickoff_delay: rt.kickoff_delay(),
            kickoff_instruction: rt.kickoff_instruction.clone(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from(&RuntimeSection::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    DeclaredLive { session_id: String },
    /// 观察到的过期声明；返回时已被清除
    DeclaredStale { session_id: String },
}

impl RunState {
    /// 可信的运行会话 id：只有 DeclaredLive 才算
    pub fn running_session_id(&self) -> Option<&str> {
        match self {
            RunState::DeclaredLive { session_id } => Some(session_id),
            _ => None,
        }
    }
}

pub struct RunCoordinator {
    registry: Arc<SessionRegistry>,
    store: MessageStore,
    pointers: Arc<PointerStore>,
    groups: Arc<dyn ProcessGroups>,
    settings: RunSettings,
    events: EventBus,
    /// 串行化 start / send / stop
    transition: Mutex<()>,
}

impl RunCoordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: MessageStore,
        pointers: Arc<PointerStore>,
        groups: Arc<dyn ProcessGroups>,
        settings: RunSettings,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            store,
            pointers,
            groups,
            settings,
            events,
            transition: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// 以实际存活的进程组校正运行声明；幂等。
    ///
    /// 声明存在但 watcher 进程组不在时清除声明（自愈，不需要操作者介入）。
    /// 列举进程失败按「没有存活进程」处理。
    ///
    /// start / send / stop 进行中时不做修复：声明写入与进程启动之间 watcher 本来就不在，
    /// 此时按声明原样报告。修复本身持有 transition 锁，不会与状态转换交错。
    pub async fn reconcile(&self) -> Result<RunState> {
        let Ok(_guard) = self.transition.try_lock() else {
            let declaration = self.pointers.load(PointerKey::Running).await?;
            return Ok(match declaration.session_id.filter(|s| !s.is_empty()) {
                Some(session_id) => {
                    tracing::debug!(session_id = %session_id, "transition in flight, declaration reported as is");
                    RunState::DeclaredLive { session_id }
                }
                None => RunState::Idle,
            });
        };

        for _ in 0..RECONCILE_ATTEMPTS {
            let declaration = self.pointers.load(PointerKey::Running).await?;
            let Some(session_id) = declaration.session_id.clone().filter(|s| !s.is_empty()) else {
                return Ok(RunState::Idle);
            };

            if self.watcher_alive().await {
                return Ok(RunState::DeclaredLive { session_id });
            }

            match self
                .pointers
                .compare_and_swap(PointerKey::Running, declaration.version, None)
                .await
            {
                Ok(_) => {
                    tracing::warn!(session_id = %session_id, "stale run declaration: no live process group, cleared");
                    self.events.emit(ConductorEvent::DeclarationRepaired {
                        session_id: session_id.clone(),
                        reason: "process group not running".to_string(),
                    });
                    return Ok(RunState::DeclaredStale { session_id });
                }
                // 另一个进程刚改过声明：重新读取再判断
                Err(DuetError::Conflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        tracing::warn!("run declaration kept changing during reconcile, reporting idle");
        Ok(RunState::Idle)
    }

    /// 权威的「是否有对话在运行」信号：先 reconcile，再读声明
    pub async fn running_session_id(&self) -> Result<Option<String>> {
        Ok(self.reconcile().await?.running_session_id().map(str::to_string))
    }

    /// 为活动会话启动一组新进程；不写运行声明（声明只在 send 时记录）。
    ///
    /// 旧进程组被终止后，指向其他会话的声明随之失效，在此清除。
    pub async fn start(&self) -> Result<String> {
        let _guard = self.transition.lock().await;
        let session_id = self
            .registry
            .active_session_id()
            .await?
            .ok_or(DuetError::NoActiveSession)?;

        self.terminate_all().await;
        self.drop_foreign_declaration(&session_id).await?;
        self.launch(&session_id).await;

        tracing::info!(session_id = %session_id, "conversation started");
        self.events.emit(ConductorEvent::RunLaunched {
            session_id: session_id.clone(),
        });
        Ok(session_id)
    }

    /// 发送人类消息并（重新）启动对话。
    ///
    /// 顺序：归档消息 → 终止旧进程组 → 写运行声明 → 启动 → 等待 → 投递给 AgentA。
    /// 先归档：即使之后进程启动失败，人类消息也已持久化。
    pub async fn send(&self, text: &str) -> Result<Message> {
        if text.is_empty() {
            return Err(DuetError::EmptyMessage);
        }
        let _guard = self.transition.lock().await;
        let session_id = self
            .registry
            .active_session_id()
            .await?
            .ok_or(DuetError::NoActiveSession)?;

        let message = self.store.append_human(&session_id, text).await?;

        self.terminate_all().await;
        self.pointers.set(PointerKey::Running, &session_id).await?;
        self.launch(&session_id).await;

        tokio::time::sleep(self.settings.kickoff_delay).await;
        let prompt = format!("{}\n\n{}", text, self.settings.kickoff_instruction);
        if let Err(e) = self.groups.send_input(&self.settings.agent_a, &prompt).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to deliver message to agent");
        }

        tracing::info!(session_id = %session_id, message_id = %message.id, "message sent");
        self.events.emit(ConductorEvent::MessageSent {
            session_id,
            message_id: message.id.clone(),
        });
        Ok(message)
    }

    /// 终止全部进程组并清除运行声明；总是成功，重复调用无额外效果
    pub async fn stop(&self) {
        let _guard = self.transition.lock().await;
        self.terminate_all().await;
        match self.pointers.clear(PointerKey::Running).await {
            Ok(_) => tracing::info!("conversation stopped"),
            Err(e) => tracing::warn!(error = %e, "failed to clear run declaration"),
        }
        self.events.emit(ConductorEvent::RunStopped);
    }

    async fn watcher_alive(&self) -> bool {
        match self.groups.list_live().await {
            Ok(live) => live.contains(&self.settings.watcher),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list process groups");
                false
            }
        }
    }

    async fn terminate_all(&self) {
        for name in &self.settings.groups {
            if let Err(e) = self.groups.kill(name).await {
                tracing::warn!(group = %name, error = %e, "failed to kill process group");
            }
        }
    }

    async fn launch(&self, session_id: &str) {
        if let Err(e) = self.groups.launch(session_id).await {
            tracing::warn!(session_id, error = %e, "failed to launch process group");
        }
    }

    async fn drop_foreign_declaration(&self, session_id: &str) -> Result<()> {
        let declaration = self.pointers.load(PointerKey::Running).await?;
        let Some(declared) = declaration.session_id.as_deref() else {
            return Ok(());
        };
        if declared == session_id {
            return Ok(());
        }
        match self
            .pointers
            .compare_and_swap(PointerKey::Running, declaration.version, None)
            .await
        {
            Ok(_) => {
                tracing::warn!(declared, active = session_id, "run declaration for another session cleared");
                self.events.emit(ConductorEvent::DeclarationRepaired {
                    session_id: declared.to_string(),
                    reason: "declared session is not the active session".to_string(),
                });
                Ok(())
            }
            Err(DuetError::Conflict { .. }) => {
                tracing::warn!("run declaration changed concurrently during start, leaving it");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
