//! 状态变更通知
//!
//! 取代前端轮询：每个改变会话或运行状态的操作都向广播总线发送一条事件，
//! Web 层以 SSE（/api/events）转发。没有订阅者时发送失败被忽略。

use futures_util::{stream, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConductorEvent {
    SessionCreated {
        session_id: String,
        name: String,
    },
    SessionActivated {
        session_id: String,
    },
    SessionDeleted {
        session_id: String,
        was_active: bool,
    },
    RunLaunched {
        session_id: String,
    },
    MessageSent {
        session_id: String,
        message_id: String,
    },
    RunStopped,
    /// 运行声明被判定为过期并清除
    DeclarationRepaired {
        session_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConductorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConductorEvent> {
        self.tx.subscribe()
    }

    /// 订阅为事件流；`token` 取消时流立即结束（长连接不会拖住优雅关闭）。
    /// 落后的订阅者跳过丢失的事件继续接收。
    pub fn stream_until(
        &self,
        token: CancellationToken,
    ) -> impl Stream<Item = ConductorEvent> + Send + 'static {
        let events = stream::unfold(self.tx.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        events.take_until(token.cancelled_owned())
    }

    pub fn emit(&self, event: ConductorEvent) {
        tracing::debug!(?event, "event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
