//! 异步 JSON 文件读写
//!
//! 所有状态文件都是「随时可能被其他进程改写」的快照：读取时缺失视为 None，
//! 写入先落临时文件再 rename，读者永远看不到写了一半的 JSON。

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::Result;

/// 读取并解析 JSON；文件不存在时返回 Ok(None)
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(s) => Ok(Some(serde_json::from_str(&s)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// 原子写入 pretty JSON（临时文件 + rename）；父目录不存在时自动创建
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;
    }
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// 仅当文件不存在时创建（用于不可变记录）；已存在返回 Ok(false)
pub async fn create_json_new<T: Serialize>(path: &Path, value: &T) -> Result<bool> {
    let body = serde_json::to_string_pretty(value)?;
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(body.as_bytes()).await?;
    file.sync_all().await?;
    Ok(true)
}

/// 目录下所有 `.json` 文件（按文件名排序，保证枚举顺序稳定）；目录不存在时返回空
pub async fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "json") && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub async fn exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}
