//! 创意看板（只读）
//!
//! 目录布局：
//! ```text
//! ideas/
//!   approved/*.json      通过的创意
//!   rejected/*.json      否决的创意
//!   proposals/idea.json  当前评审中的创意
//!   reviews/<id>.json    每个创意的评审
//!   reviews/review.json  当前创意的评审
//!   state.json           迭代状态
//! ```
//! 所有文件都是可选的；缺失或损坏的文件用默认值代替，不会让整个看板读取失败。

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{percent, rounded_mean};
use crate::core::Result;
use crate::store::{fs, is_safe_id};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub iteration: u64,
    #[serde(default)]
    pub created_at: String,
    /// tagline、pain_point、solution 等自由字段
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Idea {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub idea_id: String,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    pub total_score: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub feedback: Feedback,
    #[serde(default)]
    pub reviewed_at: String,
    #[serde(default)]
    pub iteration: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 评分等级：S ≥ 80，A ≥ 60，B ≥ 40，其余 C
pub fn grade_for(total_score: f64) -> &'static str {
    if total_score >= 80.0 {
        "S"
    } else if total_score >= 60.0 {
        "A"
    } else if total_score >= 40.0 {
        "B"
    } else {
        "C"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaState {
    #[serde(default)]
    pub current_idea_id: Option<String>,
    #[serde(default)]
    pub iteration_count: u64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub approved_count: u64,
    #[serde(default)]
    pub rejected_count: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_status() -> String {
    "idle".to_string()
}

impl Default for IdeaState {
    fn default() -> Self {
        Self {
            current_idea_id: None,
            iteration_count: 0,
            status: default_status(),
            approved_count: 0,
            rejected_count: 0,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdeaStatus {
    Approved,
    Rejected,
    Reviewing,
    Reviewed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdeaEntry {
    pub idea: Idea,
    pub review: Option<Review>,
    pub status: IdeaStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaStats {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
    pub reviewing: usize,
    pub average_score: i64,
    pub approval_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdeaBoard {
    pub stats: IdeaStats,
    pub state: IdeaState,
    pub current: Option<IdeaEntry>,
    pub approved: Vec<IdeaEntry>,
    pub rejected: Vec<IdeaEntry>,
}

#[derive(Debug, Clone)]
pub struct IdeaRepository {
    root: PathBuf,
}

impl IdeaRepository {
    pub fn new(ideas_dir: impl AsRef<Path>) -> Self {
        Self {
            root: ideas_dir.as_ref().to_path_buf(),
        }
    }

    pub async fn load_board(&self) -> Result<IdeaBoard> {
        let approved = self.load_dir("approved", IdeaStatus::Approved).await?;
        let rejected = self.load_dir("rejected", IdeaStatus::Rejected).await?;
        let current = self.load_current().await;
        let state = read_optional::<IdeaState>(&self.root.join("state.json"))
            .await
            .unwrap_or_default();

        let scores: Vec<f64> = approved
            .iter()
            .chain(rejected.iter())
            .filter_map(|e| e.review.as_ref().map(|r| r.total_score))
            .collect();
        let reviewing = usize::from(current.is_some());
        let total = approved.len() + rejected.len() + reviewing;
        let stats = IdeaStats {
            total,
            approved: approved.len(),
            rejected: rejected.len(),
            reviewing,
            average_score: rounded_mean(&scores),
            approval_rate: percent(approved.len(), total),
        };

        Ok(IdeaBoard {
            stats,
            state,
            current,
            approved,
            rejected,
        })
    }

    async fn load_dir(&self, name: &str, status: IdeaStatus) -> Result<Vec<IdeaEntry>> {
        let mut entries = Vec::new();
        for path in fs::list_json_files(&self.root.join(name)).await? {
            let Some(idea) = read_optional::<Idea>(&path).await else {
                continue;
            };
            let review = self.review_for(&idea.id).await;
            entries.push(IdeaEntry { idea, review, status });
        }
        entries.sort_by(newest_first);
        Ok(entries)
    }

    async fn load_current(&self) -> Option<IdeaEntry> {
        let idea = read_optional::<Idea>(&self.root.join("proposals").join("idea.json")).await?;
        let review = read_optional::<Review>(&self.root.join("reviews").join("review.json"))
            .await
            .map(with_grade);
        let status = if review.is_some() {
            IdeaStatus::Reviewed
        } else {
            IdeaStatus::Reviewing
        };
        Some(IdeaEntry { idea, review, status })
    }

    async fn review_for(&self, idea_id: &str) -> Option<Review> {
        if !is_safe_id(idea_id) {
            return None;
        }
        let path = self.root.join("reviews").join(format!("{}.json", idea_id));
        read_optional::<Review>(&path).await.map(with_grade)
    }
}

fn with_grade(mut review: Review) -> Review {
    if review.grade.is_none() {
        review.grade = Some(grade_for(review.total_score).to_string());
    }
    review
}

/// created_at 倒序；无法解析的排在最后
fn newest_first(a: &IdeaEntry, b: &IdeaEntry) -> Ordering {
    b.idea.created_at().cmp(&a.idea.created_at())
}

/// 缺失返回 None；损坏记 warn 后同样返回 None
async fn read_optional<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match fs::read_json::<T>(path).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable idea file");
            None
        }
    }
}
