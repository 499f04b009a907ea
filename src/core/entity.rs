//! 目录和文件实体
//!
//! 实体只是指向某个存储上条目的句柄，每次列表都会生成新的实体，反映后端的当前状态。

use crate::core::filter::IgnoreFilter;
use crate::core::transfer;
use crate::error::{SyncError, SyncResult};
use crate::storage::{join_path, BackendKind, Entry, Granularity, Storage};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// 目录实体
#[derive(Clone)]
pub struct SyncDir {
    storage: Arc<dyn Storage>,
    path: String,
    name: String,
}

/// 文件实体
#[derive(Clone)]
pub struct SyncFile {
    storage: Arc<dyn Storage>,
    path: String,
    name: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// 一次列表的结果
pub struct Listing {
    pub dirs: Vec<SyncDir>,
    pub files: Vec<SyncFile>,
}

impl SyncDir {
    /// 存储根目录
    pub fn root(storage: Arc<dyn Storage>) -> Self {
        let name = storage.root_name();
        Self {
            storage,
            path: String::new(),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 相对存储根的路径
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn full_name(&self) -> String {
        self.storage.full_name(&self.path)
    }

    pub fn kind(&self) -> BackendKind {
        self.storage.kind()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// 子目录句柄，不要求已经存在
    pub fn child(&self, name: &str) -> SyncDir {
        SyncDir {
            storage: self.storage.clone(),
            path: join_path(&self.path, name),
            name: name.to_string(),
        }
    }

    /// 子条目的完整路径（用于显示）
    pub fn child_full_name(&self, name: &str) -> String {
        self.storage.full_name(&join_path(&self.path, name))
    }

    /// 根目录是否存在且为目录
    pub async fn exists(&self) -> SyncResult<bool> {
        Ok(self
            .storage
            .stat(&self.path)
            .await?
            .map(|e| e.is_dir)
            .unwrap_or(false))
    }

    /// 一次列表同时得到子目录和文件
    pub async fn list(&self) -> SyncResult<Listing> {
        let entries = self.storage.list(&self.path).await?;
        let mut listing = Listing {
            dirs: Vec::new(),
            files: Vec::new(),
        };
        for entry in entries {
            if entry.is_dir {
                listing.dirs.push(SyncDir {
                    storage: self.storage.clone(),
                    path: entry.path,
                    name: entry.name,
                });
            } else {
                listing.files.push(SyncFile::from_entry(self.storage.clone(), entry));
            }
        }
        Ok(listing)
    }

    pub async fn dirs(&self) -> SyncResult<Vec<SyncDir>> {
        Ok(self.list().await?.dirs)
    }

    pub async fn files(&self) -> SyncResult<Vec<SyncFile>> {
        Ok(self.list().await?.files)
    }

    /// 递归删除目录及其全部内容
    pub async fn delete(&self) -> SyncResult<()> {
        if self.path.is_empty() {
            return Err(SyncError::Configuration(format!(
                "refusing to delete storage root {}",
                self.full_name()
            )));
        }
        self.storage.delete_dir(&self.path).await
    }

    /// 把整个目录复制到 `parent` 下，保持名称，返回传输的字节数
    pub async fn copy_to(&self, parent: &SyncDir, filter: &IgnoreFilter) -> SyncResult<u64> {
        transfer::copy_dir(self, parent, filter).await
    }
}

impl SyncFile {
    fn from_entry(storage: Arc<dyn Storage>, entry: Entry) -> Self {
        Self {
            storage,
            path: entry.path,
            name: entry.name,
            size: entry.size,
            modified: entry.modified,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn full_name(&self) -> String {
        self.storage.full_name(&self.path)
    }

    pub fn kind(&self) -> BackendKind {
        self.storage.kind()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// 按指定精度格式化修改时间（UTC），后端未提供时间时返回 None
    pub fn modified_at(&self, granularity: Granularity) -> Option<String> {
        self.modified
            .map(|t| t.format(granularity.format()).to_string())
    }

    /// 文件自身后端的时间精度
    pub fn granularity(&self) -> Granularity {
        self.storage.granularity()
    }

    /// 完整内容哈希；后端不支持时返回 UnsupportedOperation
    pub async fn hash(&self) -> SyncResult<String> {
        self.storage.hash(&self.path).await
    }

    pub async fn delete(&self) -> SyncResult<()> {
        self.storage.delete_file(&self.path).await
    }

    /// 把文件复制到 `parent` 下，保持名称（覆盖），返回传输的字节数
    pub async fn copy_to(&self, parent: &SyncDir) -> SyncResult<u64> {
        transfer::copy_file(self, parent).await
    }
}

impl fmt::Debug for SyncDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncDir")
            .field("storage", &self.storage.name())
            .field("path", &self.path)
            .finish()
    }
}

impl fmt::Debug for SyncFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncFile")
            .field("storage", &self.storage.name())
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}
