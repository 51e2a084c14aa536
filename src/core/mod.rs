//! 核心层：错误类型、事件总线、Conductor 门面与优雅关闭

pub mod conductor;
pub mod error;
pub mod events;
pub mod shutdown;

pub use conductor::Conductor;
pub use error::{DuetError, Result};
pub use events::{ConductorEvent, EventBus};
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason, StopConversation};
