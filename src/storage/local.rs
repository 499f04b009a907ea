use super::{join_path, BackendKind, ByteStream, Entry, Storage, CHUNK_SIZE};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// 写入中的临时文件后缀
const TEMP_SUFFIX: &str = ".dirsync-tmp";

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    /// 不会创建不存在的根目录，根目录的校验由同步任务负责
    pub fn new(path: &str) -> SyncResult<Self> {
        if path.trim().is_empty() {
            return Err(SyncError::Configuration(
                "local storage requires a path".to_string(),
            ));
        }
        let base_path = PathBuf::from(path);
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    fn io_err(&self, path: &Path, err: io::Error) -> SyncError {
        SyncError::io(path.display().to_string(), err)
    }

    /// 同目录下的临时文件，写完后原子重命名
    fn temp_path(full_path: &Path) -> PathBuf {
        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        full_path.with_file_name(format!(".{}{}", file_name, TEMP_SUFFIX))
    }

    fn to_entry(name: String, path: String, metadata: &std::fs::Metadata) -> Entry {
        Entry {
            name,
            path,
            is_dir: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn root_name(&self) -> String {
        self.base_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.base_path.display().to_string())
    }

    fn full_name(&self, path: &str) -> String {
        self.resolve_path(path).display().to_string()
    }

    fn case_sensitive(&self) -> bool {
        !cfg!(windows)
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve_path(path))
    }

    async fn list(&self, path: &str) -> SyncResult<Vec<Entry>> {
        let dir = self.resolve_path(path);
        let mut reader = fs::read_dir(&dir).await.map_err(|e| self.io_err(&dir, e))?;

        let mut entries = Vec::new();
        while let Some(item) = reader.next_entry().await.map_err(|e| self.io_err(&dir, e))? {
            let metadata = item
                .metadata()
                .await
                .map_err(|e| self.io_err(&item.path(), e))?;

            // 符号链接等特殊文件不参与同步
            if !metadata.is_dir() && !metadata.is_file() {
                tracing::debug!("跳过特殊文件: {:?}", item.path());
                continue;
            }

            let name = item.file_name().to_string_lossy().into_owned();
            // 中断写入留下的临时文件
            if is_temp_name(&name) {
                tracing::debug!("跳过临时文件: {:?}", item.path());
                continue;
            }
            let rel = join_path(path, &name);
            entries.push(Self::to_entry(name, rel, &metadata));
        }

        Ok(entries)
    }

    async fn stat(&self, path: &str) -> SyncResult<Option<Entry>> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(metadata) => {
                let name = full_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(Some(Self::to_entry(name, path.to_string(), &metadata)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(&full_path, e)),
        }
    }

    async fn read_stream(&self, path: &str) -> SyncResult<ByteStream> {
        let full_path = self.resolve_path(path);
        let file = fs::File::open(&full_path)
            .await
            .map_err(|e| self.io_err(&full_path, e))?;

        let display = full_path.display().to_string();
        Ok(ReaderStream::with_capacity(file, CHUNK_SIZE)
            .map_err(move |e| SyncError::io(display.clone(), e))
            .boxed())
    }

    async fn write_stream(&self, path: &str, mut stream: ByteStream) -> SyncResult<u64> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(parent, e))?;
        }

        // 使用临时文件写入，然后原子重命名
        let temp_path = Self::temp_path(&full_path);
        let written = async {
            let mut file = fs::File::create(&temp_path)
                .await
                .map_err(|e| self.io_err(&temp_path, e))?;
            let mut written = 0u64;
            while let Some(chunk) = stream.try_next().await? {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| self.io_err(&temp_path, e))?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| self.io_err(&temp_path, e))?;
            Ok::<_, SyncError>(written)
        }
        .await;

        let written = match written {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(self.io_err(&full_path, e));
        }

        Ok(written)
    }

    async fn create_dir(&self, path: &str) -> SyncResult<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| self.io_err(&full_path, e))
    }

    async fn delete_file(&self, path: &str) -> SyncResult<()> {
        let full_path = self.resolve_path(path);
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(&full_path, e)),
        }
    }

    async fn delete_dir(&self, path: &str) -> SyncResult<()> {
        let full_path = self.resolve_path(path);
        match fs::remove_dir_all(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(&full_path, e)),
        }
    }

    async fn hash(&self, path: &str) -> SyncResult<String> {
        let full_path = self.resolve_path(path);
        let display = full_path.display().to_string();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || hash_file(&full_path))
            .await
            .map_err(|e| SyncError::io(display.clone(), io::Error::other(e)))?
            .map_err(|e| SyncError::io(display, e))
    }

    async fn set_modified(&self, path: &str, time: DateTime<Utc>) -> SyncResult<()> {
        let full_path = self.resolve_path(path);
        let display = full_path.display().to_string();

        tokio::task::spawn_blocking(move || set_file_mtime(&full_path, time.into()))
            .await
            .map_err(|e| SyncError::io(display.clone(), io::Error::other(e)))?
            .map_err(|e| SyncError::io(display, e))
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

/// 计算文件内容的 BLAKE3 哈希（完整内容）
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

pub(crate) fn set_file_mtime(path: &Path, time: SystemTime) -> io::Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(time)
}
