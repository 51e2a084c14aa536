//! 查询层：只读聚合，不持有独立状态

pub mod facade;
pub mod ideas;

pub use facade::{
    ConversationStats, LiveFeed, LiveStatus, QueryFacade, SessionDetail, SessionsOverview,
};
pub use ideas::{IdeaBoard, IdeaEntry, IdeaRepository, IdeaState, IdeaStats, IdeaStatus, Review};

/// 百分比，四舍五入到整数；分母为 0 时为 0
pub fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    (part as f64 / whole as f64 * 100.0).round() as u32
}

/// 均值，四舍五入到整数；空集为 0
pub fn rounded_mean(values: &[f64]) -> i64 {
    if values.is_empty() {
        return 0;
    }
    (values.iter().sum::<f64>() / values.len() as f64).round() as i64
}
