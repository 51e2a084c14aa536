//! 进程组协作者接口
//!
//! 一次对话对应一组外部进程（AgentA、AgentB、watcher）。核心只通过这四个操作与之交互，
//! 具体实现可以是 tmux，也可以是测试用的内存实现。所有操作都是尽力而为：
//! 「杀掉不存在的进程组」是成功，不是错误。

use std::collections::HashSet;

use async_trait::async_trait;

#[async_trait]
pub trait ProcessGroups: Send + Sync {
    /// 当前存活的进程组名
    async fn list_live(&self) -> anyhow::Result<HashSet<String>>;

    /// 启动绑定到指定会话的整组进程；返回时命令已发出，不等待进程就绪
    async fn launch(&self, session_id: &str) -> anyhow::Result<()>;

    /// 终止一个进程组；不存在时视为成功
    async fn kill(&self, name: &str) -> anyhow::Result<()>;

    /// 向进程组的输入通道投递一段文本并回车
    async fn send_input(&self, target: &str, text: &str) -> anyhow::Result<()>;
}
