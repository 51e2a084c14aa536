//! Duet - 双智能体轮流对话的会话与运行协调
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、事件总线、Conductor 门面、优雅关闭
//! - **store**: 会话目录布局、不可变消息归档、版本化指针文件
//! - **session**: 会话注册表（元数据与活动指针）
//! - **runtime**: 进程组协作者（tmux / 内存实现）与运行协调器
//! - **ordering**: 活动对话与历史会话两种消息排序
//! - **query**: 只读聚合视图（会话、实时状态、统计、创意看板）
//! - **observability**: tracing 初始化

pub mod config;
pub mod core;
pub mod observability;
pub mod ordering;
pub mod query;
pub mod runtime;
pub mod session;
pub mod store;

pub use crate::core::{Conductor, ConductorEvent, DuetError};
