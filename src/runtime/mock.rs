//! 内存进程组（用于测试，无需 tmux）
//!
//! 记录每一次调用，`launch` 把整组名字标记为存活，`kill` 移除；
//! `crash()` 模拟协议之外的进程死亡（崩溃、手动 kill）；
//! `hold_launches()` 让 launch 停在半途，用来观察与状态转换重叠的读取。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::process::ProcessGroups;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCall {
    ListLive,
    Launch { session_id: String },
    Kill { name: String },
    SendInput { target: String, text: String },
}

#[derive(Debug)]
pub struct MockProcessGroups {
    group_names: Vec<String>,
    live: Mutex<HashSet<String>>,
    calls: Mutex<Vec<ProcessCall>>,
    fail_launch: AtomicBool,
    hold_launch: AtomicBool,
    launch_entered: Notify,
    launch_released: Notify,
}

impl MockProcessGroups {
    pub fn new<I, S>(group_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group_names: group_names.into_iter().map(Into::into).collect(),
            live: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            fail_launch: AtomicBool::new(false),
            hold_launch: AtomicBool::new(false),
            launch_entered: Notify::new(),
            launch_released: Notify::new(),
        }
    }

    /// 之后的 launch 全部失败（模拟 tmux 不可用）
    pub fn fail_launches(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// 之后的 launch 在标记存活之前挂起，直到 [`release_launch`](Self::release_launch)
    pub fn hold_launches(&self, hold: bool) {
        self.hold_launch.store(hold, Ordering::SeqCst);
    }

    /// 等到某个 launch 进入挂起状态
    pub async fn launch_started(&self) {
        self.launch_entered.notified().await;
    }

    pub fn release_launch(&self) {
        self.launch_released.notify_one();
    }

    /// 所有进程组在协议之外死亡
    pub fn crash(&self) {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn live(&self) -> HashSet<String> {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls(&self) -> Vec<ProcessCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// 除 ListLive 以外的调用（真正产生副作用的那些）
    pub fn effects(&self) -> Vec<ProcessCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, ProcessCall::ListLive))
            .collect()
    }

    fn record(&self, call: ProcessCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

impl Default for MockProcessGroups {
    fn default() -> Self {
        Self::new(["claude1", "claude2", "watcher"])
    }
}

#[async_trait]
impl ProcessGroups for MockProcessGroups {
    async fn list_live(&self) -> anyhow::Result<HashSet<String>> {
        self.record(ProcessCall::ListLive);
        Ok(self.live())
    }

    async fn launch(&self, session_id: &str) -> anyhow::Result<()> {
        self.record(ProcessCall::Launch {
            session_id: session_id.to_string(),
        });
        if self.fail_launch.load(Ordering::SeqCst) {
            anyhow::bail!("launch failed (mock)");
        }
        if self.hold_launch.load(Ordering::SeqCst) {
            self.launch_entered.notify_one();
            self.launch_released.notified().await;
        }
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.extend(self.group_names.iter().cloned());
        Ok(())
    }

    async fn kill(&self, name: &str) -> anyhow::Result<()> {
        self.record(ProcessCall::Kill {
            name: name.to_string(),
        });
        self.live.lock().unwrap_or_else(|e| e.into_inner()).remove(name);
        Ok(())
    }

    async fn send_input(&self, target: &str, text: &str) -> anyhow::Result<()> {
        self.record(ProcessCall::SendInput {
            target: target.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
