//! 会话目录与活动会话指针

pub mod registry;

pub use registry::{Session, SessionRegistry, SessionSummary};
