use crate::core::entity::SyncFile;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 比较策略，整个任务固定使用一种，不会互相回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// 字节数相同即认为未变化
    Size,
    /// 修改时间在两端较粗的精度下相同即认为未变化
    #[default]
    Date,
    /// 完整内容哈希相同即认为未变化
    #[serde(alias = "hashCode")]
    Hash,
}

/// 后端不支持哈希时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnsupportedHash {
    /// 返回 UnsupportedOperation 错误
    #[default]
    Fail,
    /// 视为已变化并复制
    Copy,
}

/// 文件比较器
#[derive(Debug, Clone, Copy)]
pub struct FileComparator {
    strategy: Strategy,
    on_unsupported: UnsupportedHash,
}

impl FileComparator {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            on_unsupported: UnsupportedHash::Fail,
        }
    }

    pub fn with_unsupported(mut self, on_unsupported: UnsupportedHash) -> Self {
        self.on_unsupported = on_unsupported;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// 判断两个同名文件是否未变化
    pub async fn is_unchanged(&self, source: &SyncFile, target: &SyncFile) -> SyncResult<bool> {
        match self.strategy {
            Strategy::Size => Ok(source.size() == target.size()),
            Strategy::Date => Ok(Self::same_date(source, target)),
            Strategy::Hash => self.same_hash(source, target).await,
        }
    }

    /// 任一端是远程类后端时按分钟比较，否则按秒比较
    fn same_date(source: &SyncFile, target: &SyncFile) -> bool {
        let granularity = source.granularity().coarsest(target.granularity());
        match (source.modified_at(granularity), target.modified_at(granularity)) {
            (Some(src), Some(dst)) => {
                if src != dst {
                    debug!("文件时间不同: {} (src={}, dst={})", source.path(), src, dst);
                }
                src == dst
            }
            // 缺少时间无法证明相同
            _ => false,
        }
    }

    async fn same_hash(&self, source: &SyncFile, target: &SyncFile) -> SyncResult<bool> {
        let hashes = match source.hash().await {
            Ok(src) => target.hash().await.map(|dst| (src, dst)),
            Err(e) => Err(e),
        };

        match hashes {
            Ok((src, dst)) => Ok(src == dst),
            Err(SyncError::UnsupportedOperation { .. }) if self.on_unsupported == UnsupportedHash::Copy => {
                debug!("后端不支持哈希，按已变化处理: {}", source.path());
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
