//! 会话注册表（Session Registry）
//!
//! 会话元数据的持久目录与 ActivePointer 的唯一所有者。
//! 创建的新会话立即成为活动会话；删除活动会话时清空指针，但不会停止正在运行的对话。

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::core::{DuetError, Result};
use crate::store::{fs, MessageStore, PointerKey, PointerStore};

/// 会话元数据（meta.json），创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 列表项：会话 + 派生的消息数
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub message_count: usize,
}

pub struct SessionRegistry {
    store: MessageStore,
    pointers: Arc<PointerStore>,
    /// 本进程最后分配的毫秒戳，保证同一进程内 id 单调
    last_stamp: Mutex<i64>,
}

impl SessionRegistry {
    pub fn new(store: MessageStore, pointers: Arc<PointerStore>) -> Self {
        Self {
            store,
            pointers,
            last_stamp: Mutex::new(0),
        }
    }

    /// 创建会话：分配 `session_<毫秒>` id，写入元数据与初始轮次状态，并设为活动会话
    pub async fn create(&self, name: Option<&str>) -> Result<Session> {
        tokio::fs::create_dir_all(self.store.sessions_dir()).await?;
        let id = self.allocate_id().await?;

        let now = Utc::now();
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => format!("Session {}", now.with_timezone(&Local).format("%Y/%m/%d %H:%M:%S")),
        };
        let session = Session {
            id: id.clone(),
            name,
            created_at: now,
            extra: Map::new(),
        };

        self.store.init_session(&id).await?;
        let meta = self
            .store
            .meta_path(&id)
            .ok_or_else(|| DuetError::storage(format!("invalid session id {}", id)))?;
        fs::write_json_atomic(&meta, &session).await?;
        self.pointers.set(PointerKey::Active, &id).await?;

        tracing::info!(session_id = %id, name = %session.name, "session created");
        Ok(session)
    }

    /// 全部会话（含消息数），按创建时间倒序
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut entries = match tokio::fs::read_dir(self.store.sessions_dir()).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            let session = match self.load_meta(&id).await {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "skipping session with invalid metadata");
                    continue;
                }
            };
            let message_count = self.store.count(&id).await?;
            summaries.push(SessionSummary {
                session,
                message_count,
            });
        }

        summaries.sort_by(|a, b| {
            b.session
                .created_at
                .cmp(&a.session.created_at)
                .then_with(|| b.session.id.cmp(&a.session.id))
        });
        Ok(summaries)
    }

    pub async fn get(&self, id: &str) -> Result<Session> {
        match self.load_meta(id).await {
            Ok(Some(s)) => Ok(s),
            Ok(None) => Err(DuetError::not_found(id)),
            Err(DuetError::Serialization(e)) => {
                tracing::warn!(session_id = id, error = %e, "invalid session metadata");
                Err(DuetError::not_found(id))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.store.session_exists(id).await
    }

    /// 设为活动会话；不检查运行状态（允许在另一个会话运行时预览）
    pub async fn activate(&self, id: &str) -> Result<()> {
        if !self.exists(id).await {
            return Err(DuetError::not_found(id));
        }
        self.pointers.set(PointerKey::Active, id).await?;
        tracing::info!(session_id = id, "session activated");
        Ok(())
    }

    /// 删除会话及其归档；若为活动会话则清空指针。不存在的 id 也视为成功。
    ///
    /// 不会停止运行中的对话：删除被声明运行的会话会留下悬空的 RunDeclaration，
    /// 由协调器在进程组消失后清理。
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.store.remove_session(id).await?;
        let was_active = self.pointers.clear_if(PointerKey::Active, id).await?;
        if self.pointers.get(PointerKey::Running).await?.as_deref() == Some(id) {
            tracing::warn!(session_id = id, "deleted a session that is declared running");
        }
        tracing::info!(session_id = id, was_active, "session deleted");
        Ok(was_active)
    }

    /// 活动会话 id；指针指向已不存在的会话时按无活动会话处理
    pub async fn active_session_id(&self) -> Result<Option<String>> {
        let Some(id) = self.pointers.get(PointerKey::Active).await? else {
            return Ok(None);
        };
        if self.exists(&id).await {
            Ok(Some(id))
        } else {
            tracing::warn!(session_id = %id, "active pointer references a missing session");
            Ok(None)
        }
    }

    async fn load_meta(&self, id: &str) -> Result<Option<Session>> {
        match self.store.meta_path(id) {
            Some(path) => fs::read_json(&path).await,
            None => Ok(None),
        }
    }

    /// 通过 create_dir 原子地占用目录名，撞名时顺延 1ms
    async fn allocate_id(&self) -> Result<String> {
        let mut last = self.last_stamp.lock().await;
        let mut stamp = Utc::now().timestamp_millis().max(*last + 1);
        loop {
            let id = format!("session_{}", stamp);
            let dir = self
                .store
                .session_dir(&id)
                .ok_or_else(|| DuetError::storage(format!("invalid session id {}", id)))?;
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    *last = stamp;
                    return Ok(id);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> (SessionRegistry, Arc<PointerStore>) {
        let pointers = Arc::new(PointerStore::new(dir.path()));
        let store = MessageStore::new(dir.path());
        (SessionRegistry::new(store, pointers.clone()), pointers)
    }

    #[tokio::test]
    async fn test_create_sets_active_and_unique_ids() {
        let dir = TempDir::new().unwrap();
        let (reg, _) = registry(&dir);
        let a = reg.create(Some("first")).await.unwrap();
        let b = reg.create(None).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(b.name.starts_with("Session "));
        assert_eq!(reg.active_session_id().await.unwrap(), Some(b.id.clone()));
    }

    #[tokio::test]
    async fn test_list_is_newest_first_with_counts() {
        let dir = TempDir::new().unwrap();
        let (reg, _) = registry(&dir);
        let a = reg.create(Some("a")).await.unwrap();
        let b = reg.create(Some("b")).await.unwrap();
        MessageStore::new(dir.path()).append_human(&a.id, "hello").await.unwrap();

        let list = reg.list().await.unwrap();
        let ids: Vec<_> = list.iter().map(|s| s.session.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);
        assert_eq!(list[1].message_count, 1);
        assert_eq!(list[0].message_count, 0);
    }

    #[tokio::test]
    async fn test_list_empty_and_skips_dirs_without_meta() {
        let dir = TempDir::new().unwrap();
        let (reg, _) = registry(&dir);
        assert!(reg.list().await.unwrap().is_empty());
        tokio::fs::create_dir_all(dir.path().join("sessions/stray")).await.unwrap();
        assert!(reg.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_and_activate_unknown() {
        let dir = TempDir::new().unwrap();
        let (reg, _) = registry(&dir);
        assert!(reg.get("session_1").await.unwrap_err().is_not_found());
        assert_eq!(
            reg.activate("session_1").await.unwrap_err(),
            DuetError::not_found("session_1")
        );
        assert!(reg.get("../../etc").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_meta_round_trips_camel_case() {
        let dir = TempDir::new().unwrap();
        let (reg, _) = registry(&dir);
        let s = reg.create(Some("named")).await.unwrap();
        let raw = tokio::fs::read_to_string(dir.path().join("sessions").join(&s.id).join("meta.json"))
            .await
            .unwrap();
        assert!(raw.contains("\"createdAt\""));
        assert_eq!(reg.get(&s.id).await.unwrap(), s);
    }

    #[tokio::test]
    async fn test_delete_active_clears_pointer_other_keeps_it() {
        let dir = TempDir::new().unwrap();
        let (reg, _) = registry(&dir);
        let a = reg.create(Some("a")).await.unwrap();
        let b = reg.create(Some("b")).await.unwrap();

        assert!(!reg.delete(&a.id).await.unwrap());
        assert_eq!(reg.active_session_id().await.unwrap(), Some(b.id.clone()));

        assert!(reg.delete(&b.id).await.unwrap());
        assert_eq!(reg.active_session_id().await.unwrap(), None);

        // 幂等
        reg.delete(&b.id).await.unwrap();
        assert!(reg.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dangling_active_pointer_reads_none() {
        let dir = TempDir::new().unwrap();
        let (reg, pointers) = registry(&dir);
        pointers.set(PointerKey::Active, "session_gone").await.unwrap();
        assert_eq!(reg.active_session_id().await.unwrap(), None);
    }
}
