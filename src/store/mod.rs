//! 持久化层：消息归档、轮次状态、进程级指针

pub mod archive;
pub mod fs;
pub mod message;
pub mod pointer;

pub use archive::{is_safe_id, MessageStore};
pub use message::{Message, MessageKey, Origin, Role, TurnState};
pub use pointer::{PointerKey, PointerStore, Versioned};
