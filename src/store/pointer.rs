//! 进程级指针：ActivePointer 与 RunDeclaration
//!
//! 每个指针一个 JSON 文件 `{ "sessionId": ..., "version": n }`，构成一个极小的带版本 KV。
//! 进程内写者由互斥锁串行化；跨进程的竞争通过版本号在 `compare_and_swap` 中暴露为 Conflict，
//! 其余写入保持 last-writer-wins。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::fs;
use crate::core::{DuetError, Result};

/// 指针名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKey {
    /// 当前被操作/查看的会话
    Active,
    /// 被声明为正在运行对话的会话
    Running,
}

impl PointerKey {
    pub fn name(&self) -> &'static str {
        match self {
            PointerKey::Active => "active_session",
            PointerKey::Running => "running_session",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            PointerKey::Active => "active_session.json",
            PointerKey::Running => "running_session.json",
        }
    }
}

/// 指针值及其版本；缺失的文件读作 (None, 0)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versioned {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug)]
pub struct PointerStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl PointerStore {
    pub fn new(messages_dir: impl AsRef<Path>) -> Self {
        Self {
            root: messages_dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self, key: PointerKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// 读取快照；内容损坏时记 warn 并按空指针处理，交由下一次写入覆盖
    pub async fn load(&self, key: PointerKey) -> Result<Versioned> {
        match fs::read_json::<Versioned>(&self.path(key)).await {
            Ok(v) => Ok(v.unwrap_or_default()),
            Err(DuetError::Serialization(e)) => {
                tracing::warn!(pointer = key.name(), error = %e, "corrupt pointer file, treating as empty");
                Ok(Versioned::default())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, key: PointerKey) -> Result<Option<String>> {
        Ok(self.load(key).await?.session_id.filter(|s| !s.is_empty()))
    }

    /// 无条件写入（last-writer-wins），版本 +1
    pub async fn set(&self, key: PointerKey, session_id: &str) -> Result<Versioned> {
        let _guard = self.write_lock.lock().await;
        let current = self.load(key).await?;
        self.write(key, Some(session_id.to_string()), current.version).await
    }

    /// 清空指针；已经为空时不写盘、不改版本（幂等）
    pub async fn clear(&self, key: PointerKey) -> Result<Versioned> {
        let _guard = self.write_lock.lock().await;
        let current = self.load(key).await?;
        if current.session_id.is_none() {
            return Ok(current);
        }
        self.write(key, None, current.version).await
    }

    /// 仅当当前值等于 `session_id` 时清空；返回是否清空
    pub async fn clear_if(&self, key: PointerKey, session_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let current = self.load(key).await?;
        if current.session_id.as_deref() != Some(session_id) {
            return Ok(false);
        }
        self.write(key, None, current.version).await?;
        Ok(true)
    }

    /// 比较并交换：磁盘版本仍为 `expected_version` 时写入 `new`，否则返回 Conflict
    pub async fn compare_and_swap(
        &self,
        key: PointerKey,
        expected_version: u64,
        new: Option<String>,
    ) -> Result<Versioned> {
        let _guard = self.write_lock.lock().await;
        let current = self.load(key).await?;
        if current.version != expected_version {
            return Err(DuetError::Conflict {
                key: key.name(),
                expected: expected_version,
                actual: current.version,
            });
        }
        self.write(key, new, current.version).await
    }

    async fn write(&self, key: PointerKey, session_id: Option<String>, prev_version: u64) -> Result<Versioned> {
        let next = Versioned {
            session_id,
            version: prev_version + 1,
        };
        fs::write_json_atomic(&self.path(key), &next).await?;
        Ok(next)
    }
}
