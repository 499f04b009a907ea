use super::{BackendKind, ByteStream, Entry, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::FtpEndpoint;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

pub struct FtpStorage {
    operator: Operator,
    name: String,
    root: String,
}

impl FtpStorage {
    pub fn new(config: &FtpEndpoint) -> SyncResult<Self> {
        use opendal::services::Ftp;

        if config.host.trim().is_empty() {
            return Err(SyncError::Configuration(
                "FTP storage requires host".to_string(),
            ));
        }
        if config.encoding.is_some() {
            tracing::warn!("FTP 客户端不支持自定义编码，忽略 encoding 配置: {}", config.host);
        }

        let root = normalize_root(&config.path);
        let endpoint = format!("ftp://{}:{}", config.host, config.port);

        let mut builder = Ftp::default().endpoint(&endpoint).root(&root);
        if !config.user.is_empty() {
            builder = builder.user(&config.user);
        }
        if !config.pass.is_empty() {
            builder = builder.password(&config.pass);
        }

        // 添加超时层
        let operator = Operator::new(builder)
            .map_err(|e| SyncError::Configuration(format!("{}: {}", endpoint, e)))?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!("{}{}", endpoint, root.trim_end_matches('/'));

        Ok(Self {
            operator,
            name,
            root,
        })
    }

    fn map_err(&self, path: &str, err: opendal::Error) -> SyncError {
        SyncError::from_opendal(&self.name, &self.full_name(path), err)
    }

    /// 逐级创建父目录
    async fn ensure_parents(&self, path: &str) {
        for dir in parent_dirs(path) {
            // 目录可能已存在，失败不中断，真正的问题由随后的写入报告
            if let Err(e) = self.operator.create_dir(&dir).await {
                tracing::debug!("创建目录失败 {}: {}", self.full_name(&dir), e);
            }
        }
    }
}

/// opendal 的根路径需要以 `/` 开头和结尾
fn normalize_root(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

/// 文件路径的各级父目录，由浅到深，均以 `/` 结尾
fn parent_dirs(path: &str) -> Vec<String> {
    let Some((parent, _)) = path.trim_matches('/').rsplit_once('/') else {
        return Vec::new();
    };
    let mut current = String::new();
    parent
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|part| {
            current.push_str(part);
            current.push('/');
            current.clone()
        })
        .collect()
}

/// 目录路径在 opendal 中以 `/` 结尾，根目录为 `/`
fn dir_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", trimmed)
    }
}

#[async_trait]
impl Storage for FtpStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn root_name(&self) -> String {
        self.root
            .trim_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("/")
            .to_string()
    }

    fn full_name(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.name, path)
        }
    }

    async fn list(&self, path: &str) -> SyncResult<Vec<Entry>> {
        let dir = dir_path(path);
        let mut lister = self
            .operator
            .lister_with(&dir)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await
            .map_err(|e| self.map_err(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = lister.try_next().await.map_err(|e| self.map_err(path, e))? {
            let entry_path = entry.path();

            // 跳过目录自身
            if entry_path == dir || entry_path.is_empty() || entry_path == "/" {
                continue;
            }

            let meta = entry.metadata();
            let is_dir = meta.is_dir();
            entries.push(Entry {
                name: entry.name().trim_end_matches('/').to_string(),
                path: entry_path.trim_end_matches('/').to_string(),
                is_dir,
                size: if is_dir { 0 } else { meta.content_length() },
                modified: meta.last_modified(),
            });
        }

        Ok(entries)
    }

    async fn stat(&self, path: &str) -> SyncResult<Option<Entry>> {
        // 根目录通过一次列表来确认连接和存在性
        if path.trim_matches('/').is_empty() {
            return match self.operator.list("/").await {
                Ok(_) => Ok(Some(Entry {
                    name: self.root_name(),
                    path: String::new(),
                    is_dir: true,
                    size: 0,
                    modified: None,
                })),
                Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(self.map_err(path, e)),
            };
        }

        match self.operator.stat(path).await {
            Ok(meta) => Ok(Some(Entry {
                name: path.trim_end_matches('/').rsplit('/').next().unwrap_or("").to_string(),
                path: path.trim_end_matches('/').to_string(),
                is_dir: meta.is_dir(),
                size: meta.content_length(),
                modified: meta.last_modified(),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.map_err(path, e)),
        }
    }

    async fn read_stream(&self, path: &str) -> SyncResult<ByteStream> {
        let reader = self
            .operator
            .reader(path)
            .await
            .map_err(|e| self.map_err(path, e))?;
        let stream = reader
            .into_bytes_stream(..)
            .await
            .map_err(|e| self.map_err(path, e))?;

        let backend = self.name.clone();
        let display = self.full_name(path);
        Ok(stream
            .map_err(move |e| SyncError::from_stream_io(&backend, &display, e))
            .boxed())
    }

    async fn write_stream(&self, path: &str, mut stream: ByteStream) -> SyncResult<u64> {
        let path = path.trim_start_matches('/');
        self.ensure_parents(path).await;

        let mut writer = self
            .operator
            .writer(path)
            .await
            .map_err(|e| self.map_err(path, e))?;

        let mut written = 0u64;
        loop {
            let chunk = match stream.try_next().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    if let Err(abort) = writer.abort().await {
                        tracing::debug!("中止上传失败 {}: {}", self.full_name(path), abort);
                    }
                    return Err(e);
                }
            };
            let len = chunk.len() as u64;
            writer
                .write(chunk)
                .await
                .map_err(|e| self.map_err(path, e))?;
            written += len;
        }

        writer.close().await.map_err(|e| self.map_err(path, e))?;
        Ok(written)
    }

    async fn create_dir(&self, path: &str) -> SyncResult<()> {
        self.operator
            .create_dir(&dir_path(path))
            .await
            .map_err(|e| self.map_err(path, e))
    }

    async fn delete_file(&self, path: &str) -> SyncResult<()> {
        match self.operator.delete(path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.map_err(path, e)),
        }
    }

    async fn delete_dir(&self, path: &str) -> SyncResult<()> {
        match self.operator.remove_all(&dir_path(path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.map_err(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(path: &str) -> FtpEndpoint {
        FtpEndpoint {
            host: "ftp.example.com".to_string(),
            port: 21,
            user: "user".to_string(),
            pass: "secret".to_string(),
            path: path.to_string(),
            encoding: None,
        }
    }

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_root(""), "/");
        assert_eq!(normalize_root("/"), "/");
        assert_eq!(normalize_root("www/docs"), "/www/docs/");
        assert_eq!(normalize_root("/www/docs/"), "/www/docs/");
    }

    #[test]
    fn test_dir_path() {
        assert_eq!(dir_path(""), "/");
        assert_eq!(dir_path("a/b"), "a/b/");
        assert_eq!(dir_path("a/b/"), "a/b/");
    }

    #[test]
    fn test_parent_dirs() {
        assert!(parent_dirs("a.txt").is_empty());
        assert_eq!(parent_dirs("x/y/z.bin"), vec!["x/", "x/y/"]);
        assert_eq!(parent_dirs("/x//z.bin"), vec!["x/"]);
    }

    #[tokio::test]
    async fn test_names_and_kind() {
        let storage = FtpStorage::new(&endpoint("/www/docs")).unwrap();
        assert_eq!(storage.kind(), BackendKind::Remote);
        assert_eq!(storage.name(), "ftp://ftp.example.com:21/www/docs");
        assert_eq!(storage.root_name(), "docs");
        assert_eq!(
            storage.full_name("a/b.txt"),
            "ftp://ftp.example.com:21/www/docs/a/b.txt"
        );
        assert_eq!(storage.granularity(), super::super::Granularity::Minute);
    }

    #[test]
    fn test_missing_host_is_configuration_error() {
        let mut config = endpoint("/");
        config.host = String::new();
        assert!(matches!(
            FtpStorage::new(&config),
            Err(SyncError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_hash_is_unsupported() {
        let storage = FtpStorage::new(&endpoint("/www")).unwrap();
        let err = storage.hash("a.txt").await.unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedOperation { .. }));
    }
}
