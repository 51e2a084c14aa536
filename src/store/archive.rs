//! 消息归档（Message Store）
//!
//! 目录布局：`<messages_dir>/sessions/<id>/{meta.json, state.json, archive/, c1_to_c2/, c2_to_c1/}`。
//! 归档只追加、每条消息一个文件；读取结果不排序，排序交给 [`crate::ordering`]。

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::fs;
use super::message::{Message, TurnState, HUMAN_ID_PREFIX};
use crate::core::{DuetError, Result};

const META_FILE: &str = "meta.json";
const STATE_FILE: &str = "state.json";
const ARCHIVE_DIR: &str = "archive";
/// watcher 使用的两个信箱目录
const MAILBOX_DIRS: [&str; 2] = ["c1_to_c2", "c2_to_c1"];

/// 会话 id 只允许字母数字、`_`、`-`，避免拼路径时逃逸出 sessions 目录
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    sessions_dir: PathBuf,
}

impl MessageStore {
    pub fn new(messages_dir: impl AsRef<Path>) -> Self {
        Self {
            sessions_dir: messages_dir.as_ref().join("sessions"),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// 会话目录；id 不安全时返回 None（等同于不存在）
    pub fn session_dir(&self, session_id: &str) -> Option<PathBuf> {
        is_safe_id(session_id).then(|| self.sessions_dir.join(session_id))
    }

    pub fn meta_path(&self, session_id: &str) -> Option<PathBuf> {
        self.session_dir(session_id).map(|d| d.join(META_FILE))
    }

    /// 以 meta.json 是否存在判定会话存在
    pub async fn session_exists(&self, session_id: &str) -> bool {
        match self.meta_path(session_id) {
            Some(p) => fs::exists(&p).await,
            None => false,
        }
    }

    /// 为新会话创建归档、信箱目录并写入初始轮次状态
    pub async fn init_session(&self, session_id: &str) -> Result<()> {
        let dir = self
            .session_dir(session_id)
            .ok_or_else(|| DuetError::unknown_session(session_id))?;
        tokio::fs::create_dir_all(dir.join(ARCHIVE_DIR)).await?;
        for mailbox in MAILBOX_DIRS {
            tokio::fs::create_dir_all(dir.join(mailbox)).await?;
        }
        fs::write_json_atomic(&dir.join(STATE_FILE), &TurnState::initial()).await
    }

    /// 追加一条不可变消息；同 id 已存在时拒绝覆盖
    pub async fn append(&self, session_id: &str, message: &Message) -> Result<PathBuf> {
        let archive = self.archive_dir_checked(session_id).await?;
        if !is_safe_id(&message.id) {
            return Err(DuetError::storage(format!("invalid message id: {:?}", message.id)));
        }
        let path = archive.join(format!("{}.json", message.id));
        if !fs::create_json_new(&path, message).await? {
            return Err(DuetError::storage(format!("message {} already archived", message.id)));
        }
        tracing::debug!(session_id, message_id = %message.id, "message archived");
        Ok(path)
    }

    /// 归档一条人类消息：id 为 `user_<毫秒>`，撞名时顺延 1ms 直到唯一
    pub async fn append_human(&self, session_id: &str, content: &str) -> Result<Message> {
        let archive = self.archive_dir_checked(session_id).await?;
        let now = Utc::now();
        let mut stamp = now.timestamp_millis();
        loop {
            let message = Message::human(format!("{}{}", HUMAN_ID_PREFIX, stamp), content, now);
            let path = archive.join(format!("{}.json", message.id));
            if fs::create_json_new(&path, &message).await? {
                tracing::info!(session_id, message_id = %message.id, "human message archived");
                return Ok(message);
            }
            stamp += 1;
        }
    }

    /// 读取全部归档消息（未排序）。无法解析的文件跳过并记 warn
    pub async fn read_all(&self, session_id: &str) -> Result<Vec<Message>> {
        let Some(dir) = self.session_dir(session_id) else {
            return Ok(Vec::new());
        };
        let mut messages = Vec::new();
        for path in fs::list_json_files(&dir.join(ARCHIVE_DIR)).await? {
            match fs::read_json::<Message>(&path).await {
                Ok(Some(m)) => messages.push(m),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping invalid archive record"),
            }
        }
        Ok(messages)
    }

    pub async fn count(&self, session_id: &str) -> Result<usize> {
        Ok(self.read_all(session_id).await?.len())
    }

    /// 轮次状态；文件缺失或损坏时返回 None
    pub async fn read_turn_state(&self, session_id: &str) -> Result<Option<TurnState>> {
        let Some(dir) = self.session_dir(session_id) else {
            return Ok(None);
        };
        let path = dir.join(STATE_FILE);
        match fs::read_json::<TurnState>(&path).await {
            Ok(state) => Ok(state),
            Err(DuetError::Serialization(e)) => {
                tracing::warn!(session_id, error = %e, "invalid turn state, ignoring");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 删除整个会话目录（元数据、轮次状态、归档）；不存在视为成功
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        let Some(dir) = self.session_dir(session_id) else {
            return Ok(());
        };
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn archive_dir_checked(&self, session_id: &str) -> Result<PathBuf> {
        if !self.session_exists(session_id).await {
            return Err(DuetError::unknown_session(session_id));
        }
        let archive = self
            .session_dir(session_id)
            .ok_or_else(|| DuetError::unknown_session(session_id))?
            .join(ARCHIVE_DIR);
        tokio::fs::create_dir_all(&archive).await?;
        Ok(archive)
    }
}
