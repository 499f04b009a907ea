//! 文件和目录传输
//!
//! 根据两端后端类别选择传输方式：本地到本地走原生复制，其余情况都经过
//! 存储接口按块流式读出再写入，内存占用与文件大小无关。

use crate::core::entity::{SyncDir, SyncFile};
use crate::core::filter::IgnoreFilter;
use crate::error::{SyncError, SyncResult};
use crate::storage::{join_path, BackendKind, Storage};
use chrono::{DateTime, Utc};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 本地 -> 本地
    NativeCopy,
    /// 本地 -> 远程
    Upload,
    /// 远程 -> 本地
    Download,
    /// 远程 -> 远程，经本机中转
    Relay,
}

impl Route {
    pub fn resolve(source: BackendKind, target: BackendKind) -> Route {
        match (source, target) {
            (BackendKind::Local, BackendKind::Local) => Route::NativeCopy,
            (BackendKind::Local, BackendKind::Remote) => Route::Upload,
            (BackendKind::Remote, BackendKind::Local) => Route::Download,
            (BackendKind::Remote, BackendKind::Remote) => Route::Relay,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::NativeCopy => write!(f, "copy"),
            Route::Upload => write!(f, "upload"),
            Route::Download => write!(f, "download"),
            Route::Relay => write!(f, "relay"),
        }
    }
}

/// 复制单个文件到 `parent` 下（同名覆盖），返回字节数
pub async fn copy_file(source: &SyncFile, parent: &SyncDir) -> SyncResult<u64> {
    let target = parent.storage();
    let target_path = join_path(parent.path(), source.name());
    let route = Route::resolve(source.kind(), parent.kind());
    debug!("{}: {} -> {}", route, source.full_name(), target.full_name(&target_path));

    let native = match route {
        Route::NativeCopy => source
            .storage()
            .local_path(source.path())
            .zip(target.local_path(&target_path)),
        _ => None,
    };

    let bytes = match native {
        Some((from, to)) => tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| SyncError::io(to.display().to_string(), e))?,
        None => {
            let stream = source.storage().read_stream(source.path()).await?;
            target.write_stream(&target_path, stream).await?
        }
    };

    if let Some(modified) = source.modified() {
        preserve_mtime(target.as_ref(), &target_path, modified).await;
    }

    Ok(bytes)
}

/// 把整个目录（含全部子项）复制到 `parent` 下，返回字节数
///
/// 忽略规则同样作用于目录内的每一层。
pub async fn copy_dir(source: &SyncDir, parent: &SyncDir, filter: &IgnoreFilter) -> SyncResult<u64> {
    let target = parent.child(source.name());
    let route = Route::resolve(source.kind(), parent.kind());
    debug!("{} dir: {} -> {}", route, source.full_name(), target.full_name());

    let native = match route {
        Route::NativeCopy => source
            .storage()
            .local_path(source.path())
            .zip(target.storage().local_path(target.path())),
        _ => None,
    };

    match native {
        Some((from, to)) => {
            let filter = filter.clone();
            let display = from.display().to_string();
            tokio::task::spawn_blocking(move || copy_tree_native(&from, &to, &filter))
                .await
                .map_err(|e| SyncError::io(display, io::Error::other(e)))?
        }
        None => copy_tree(source, &target, filter).await,
    }
}

/// 通过存储接口逐层复制
async fn copy_tree(source: &SyncDir, target: &SyncDir, filter: &IgnoreFilter) -> SyncResult<u64> {
    let mut bytes = 0u64;
    let mut pending = vec![(source.clone(), target.clone())];

    while let Some((src, dst)) = pending.pop() {
        dst.storage().create_dir(dst.path()).await?;
        let listing = src.list().await?;

        for file in listing.files {
            if filter.is_ignored(file.name()) {
                continue;
            }
            bytes += copy_file(&file, &dst).await?;
        }
        for dir in listing.dirs {
            if filter.is_ignored(dir.name()) {
                continue;
            }
            let child = dst.child(dir.name());
            pending.push((dir, child));
        }
    }

    Ok(bytes)
}

/// 本地目录树原生复制，在阻塞线程中执行
fn copy_tree_native(from: &Path, to: &Path, filter: &IgnoreFilter) -> SyncResult<u64> {
    let mut bytes = 0u64;
    std::fs::create_dir_all(to).map_err(|e| SyncError::io(to.display().to_string(), e))?;

    let walker = WalkDir::new(from)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !filter.is_ignored(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| from.display().to_string());
            SyncError::io(path, e.into())
        })?;

        let relative = match entry.path().strip_prefix(from) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let dest: PathBuf = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| SyncError::io(dest.display().to_string(), e))?;
        } else if file_type.is_file() {
            bytes += std::fs::copy(entry.path(), &dest)
                .map_err(|e| SyncError::io(dest.display().to_string(), e))?;
            if let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
                if let Err(e) = crate::storage::local::set_file_mtime(&dest, modified) {
                    warn!("保留修改时间失败 {}: {}", dest.display(), e);
                }
            }
        } else {
            debug!("跳过特殊文件: {}", entry.path().display());
        }
    }

    Ok(bytes)
}

async fn preserve_mtime(target: &dyn Storage, path: &str, modified: DateTime<Utc>) {
    if let Err(e) = target.set_modified(path, modified).await {
        warn!("保留修改时间失败 {}: {}", target.full_name(path), e);
    }
}
