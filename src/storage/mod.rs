pub mod ftp;
pub mod local;
#[cfg(test)]
pub(crate) mod memory;

use crate::config::Endpoint;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::path::PathBuf;
use std::sync::Arc;

pub use ftp::FtpStorage;
pub use local::LocalStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 流式传输的块大小
pub const CHUNK_SIZE: usize = 256 * 1024;

/// 文件内容的字节块流
pub type ByteStream = BoxStream<'static, SyncResult<Bytes>>;

/// 后端类别，传输路由只区分本地和远程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    Remote,
}

/// 修改时间的精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    Second,
    Minute,
}

impl Granularity {
    pub fn format(self) -> &'static str {
        match self {
            Granularity::Second => "%Y-%m-%d %H:%M:%S",
            Granularity::Minute => "%Y-%m-%d %H:%M",
        }
    }

    /// 两者中较粗的精度
    pub fn coarsest(self, other: Granularity) -> Granularity {
        self.max(other)
    }
}

/// 单层目录列表中的一项
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    /// 相对存储根的路径，以 `/` 分隔，根为空串
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// 存储抽象接口
///
/// 所有路径都相对于存储根目录。列表只返回一层，不递归。
#[async_trait]
pub trait Storage: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;

    /// 根目录自身的名称
    fn root_name(&self) -> String;

    /// 后端相关的完整路径（用于显示）
    fn full_name(&self, path: &str) -> String;

    fn granularity(&self) -> Granularity {
        match self.kind() {
            BackendKind::Local => Granularity::Second,
            BackendKind::Remote => Granularity::Minute,
        }
    }

    fn case_sensitive(&self) -> bool {
        true
    }

    /// 本地磁盘上的真实路径，仅本地存储可用
    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }

    /// 列出目录下的直接子项
    async fn list(&self, path: &str) -> SyncResult<Vec<Entry>>;

    /// 获取元数据，不存在时返回 None
    async fn stat(&self, path: &str) -> SyncResult<Option<Entry>>;

    /// 按块读取文件内容
    async fn read_stream(&self, path: &str) -> SyncResult<ByteStream>;

    /// 按块写入文件（覆盖），父目录不存在时创建，返回写入的字节数
    async fn write_stream(&self, path: &str, stream: ByteStream) -> SyncResult<u64>;

    /// 创建目录（含父目录）
    async fn create_dir(&self, path: &str) -> SyncResult<()>;

    async fn delete_file(&self, path: &str) -> SyncResult<()>;

    /// 递归删除目录
    async fn delete_dir(&self, path: &str) -> SyncResult<()>;

    /// 文件内容哈希
    async fn hash(&self, _path: &str) -> SyncResult<String> {
        Err(SyncError::unsupported(self.name(), "content hash"))
    }

    /// 设置修改时间，不支持的后端忽略
    async fn set_modified(&self, _path: &str, _time: DateTime<Utc>) -> SyncResult<()> {
        Ok(())
    }
}

/// 拼接相对路径
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// 根据端点配置创建存储实例
pub fn create_storage(endpoint: &Endpoint) -> SyncResult<Arc<dyn Storage>> {
    match endpoint {
        Endpoint::Path(path) => {
            tracing::info!("初始化本地存储: {}", path);
            Ok(Arc::new(LocalStorage::new(path)?) as Arc<dyn Storage>)
        }
        Endpoint::Ftp(config) => {
            tracing::info!("初始化FTP存储: {}:{}{}", config.host, config.port, config.path);
            Ok(Arc::new(FtpStorage::new(config)?) as Arc<dyn Storage>)
        }
    }
}
