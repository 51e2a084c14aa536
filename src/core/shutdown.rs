//! 优雅关闭
//!
//! 统一监听 Ctrl+C / SIGTERM，通过 CancellationToken 通知服务循环退出，
//! 随后按注册顺序执行清理任务（每个任务有超时）。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::conductor::Conductor;

/// 单个清理任务的超时
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
}

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 关闭 token（交给 axum 的 graceful shutdown 与 SSE 流等待）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        tracing::info!(?reason, "shutdown requested");
        self.shutdown_token.cancel();
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 用于日志
    fn name(&self) -> &'static str;
}

/// 服务循环退出后按注册顺序执行清理任务
#[derive(Default)]
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Box<dyn ShutdownCleanup>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Box::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(CLEANUP_TIMEOUT, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {:?}", name, CLEANUP_TIMEOUT);
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }
}

/// 退出时停止正在运行的对话（runtime.stop_on_shutdown）
pub struct StopConversation {
    conductor: Arc<Conductor>,
}

impl StopConversation {
    pub fn new(conductor: Arc<Conductor>) -> Self {
        Self { conductor }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for StopConversation {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.conductor.stop().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StopConversation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSection;
    use crate::runtime::{MockProcessGroups, RunSettings};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_shutdown_cancels_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        manager.shutdown(ShutdownReason::Signal);
        assert!(token.is_cancelled());
    }

    struct FlagCleanup {
        called: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl ShutdownCleanup for FlagCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.called.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Flag"
        }
    }

    struct FailingCleanup;

    #[async_trait::async_trait]
    impl ShutdownCleanup for FailingCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    #[tokio::test]
    async fn test_cleanup_continues_after_failure() {
        let mut coordinator = ShutdownCoordinator::new();
        let called = Arc::new(AtomicBool::new(false));
        coordinator.register(FailingCleanup);
        coordinator.register(FlagCleanup { called: called.clone() });

        coordinator.run_cleanup().await;
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_conversation_cleanup() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = StorageSection {
            messages_dir: dir.path().join("messages"),
            ideas_dir: dir.path().join("ideas"),
        };
        let mock = Arc::new(MockProcessGroups::default());
        let settings = RunSettings {
            kickoff_delay: Duration::ZERO,
            ..RunSettings::default()
        };
        let conductor = Arc::new(Conductor::new(&storage, mock.clone(), settings));
        conductor.create_session(None).await.unwrap();
        conductor.send("hello").await.unwrap();
        assert!(conductor.running_session_id().await.unwrap().is_some());

        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(StopConversation::new(conductor.clone()));
        coordinator.run_cleanup().await;

        assert!(conductor.running_session_id().await.unwrap().is_none());
        assert!(mock.live().is_empty());
    }
}
