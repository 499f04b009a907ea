//! 同步错误类型

use std::io;
use thiserror::Error;

/// 同步操作的结果类型
pub type SyncResult<T> = Result<T, SyncError>;

/// 同步过程中可能出现的错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 配置错误：根目录无效、后端组合不支持等，在任何 I/O 之前终止任务
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 后端不可达或连接中断
    #[error("connectivity error on {backend}: {message}")]
    Connectivity { backend: String, message: String },

    /// 后端不支持该操作（例如 FTP 上计算哈希）
    #[error("unsupported operation on {backend}: {operation}")]
    UnsupportedOperation { backend: String, operation: String },

    /// 单个条目的 I/O 错误（权限不足、列出后被删除等）
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// 任务已取消
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            backend: backend.into(),
            operation: operation.into(),
        }
    }

    /// 只有连接类错误可以安全重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }

    /// 从 opendal 错误转换，按错误类型归类
    pub fn from_opendal(backend: &str, path: &str, err: opendal::Error) -> Self {
        use opendal::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Self::io(path, io::Error::new(io::ErrorKind::NotFound, err)),
            ErrorKind::PermissionDenied => {
                Self::io(path, io::Error::new(io::ErrorKind::PermissionDenied, err))
            }
            ErrorKind::AlreadyExists => {
                Self::io(path, io::Error::new(io::ErrorKind::AlreadyExists, err))
            }
            ErrorKind::Unsupported => Self::unsupported(backend, err.to_string()),
            ErrorKind::ConfigInvalid => Self::Configuration(format!("{}: {}", backend, err)),
            _ => Self::Connectivity {
                backend: backend.to_string(),
                message: format!("{}: {}", path, err),
            },
        }
    }

    /// 流式读写返回的 io::Error 可能包着 opendal 错误，取出后按同样规则归类
    pub fn from_stream_io(backend: &str, path: &str, err: io::Error) -> Self {
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<opendal::Error>()) {
            Some(Ok(inner)) => Self::from_opendal(backend, path, *inner),
            Some(Err(other)) => Self::io(path, io::Error::new(kind, other)),
            None => Self::io(path, io::Error::from(kind)),
        }
    }
}
