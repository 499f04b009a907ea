//! 目录树协调器
//!
//! 对一对 (源, 目标) 目录做一次列表，按名称分成新增 / 过时 / 共有三部分，
//! 每个条目作为独立任务执行，共有子目录递归处理。所有 I/O 都受同一个
//! 信号量限制并发，每个条目开始前检查取消。

use crate::core::compare::FileComparator;
use crate::core::diff::{keyed_diff, name_key};
use crate::core::entity::{Listing, SyncDir, SyncFile};
use crate::core::filter::IgnoreFilter;
use crate::error::{SyncError, SyncResult};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// 同步模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    /// 目标与源完全一致（新增、更新、删除）
    #[default]
    Mirror,
    /// 只新增，从不删除也不更新已有文件
    Append,
}

/// 协调参数
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub mode: SyncMode,
    pub comparator: FileComparator,
    pub filter: IgnoreFilter,
    /// 同时进行的 I/O 操作上限
    pub max_concurrency: usize,
    /// 连接错误的最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟，按 2 的幂增长
    pub retry_base_delay: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Mirror,
            comparator: FileComparator::new(Default::default()),
            filter: IgnoreFilter::default(),
            max_concurrency: 8,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// 条目动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    AddFile,
    UpdateFile,
    DeleteFile,
    AddDir,
    DeleteDir,
    ListDir,
}

impl Action {
    /// 成功时的描述
    fn done(self) -> &'static str {
        match self {
            Action::AddFile => "file added",
            Action::UpdateFile => "file updated",
            Action::DeleteFile => "file deleted",
            Action::AddDir => "directory added",
            Action::DeleteDir => "directory deleted",
            Action::ListDir => "directory listed",
        }
    }

    /// 失败时的描述
    fn verb(self) -> &'static str {
        match self {
            Action::AddFile => "add file",
            Action::UpdateFile => "update file",
            Action::DeleteFile => "delete file",
            Action::AddDir => "add directory",
            Action::DeleteDir => "delete directory",
            Action::ListDir => "list directory",
        }
    }
}

/// 进度事件，每个新增/更新/删除的条目至少一条
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub job: String,
    pub action: Action,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Progress {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "[{}] {}: {}", self.job, self.action.done(), self.path),
            Some(err) => write!(
                f,
                "[{}] failed to {} {}: {}",
                self.job,
                self.action.verb(),
                self.path,
                err
            ),
        }
    }
}

/// 统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStats {
    pub files_added: u64,
    pub files_updated: u64,
    pub files_deleted: u64,
    pub files_skipped: u64,
    pub dirs_added: u64,
    pub dirs_deleted: u64,
    pub failures: u64,
    pub bytes_transferred: u64,
}

impl ReconcileStats {
    /// 是否有任何写入或删除
    pub fn has_changes(&self) -> bool {
        self.files_added + self.files_updated + self.files_deleted + self.dirs_added + self.dirs_deleted
            > 0
    }
}

#[derive(Default)]
struct Counters {
    files_added: AtomicU64,
    files_updated: AtomicU64,
    files_deleted: AtomicU64,
    files_skipped: AtomicU64,
    dirs_added: AtomicU64,
    dirs_deleted: AtomicU64,
    failures: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl Counters {
    fn record(&self, action: Action, bytes: u64) {
        let counter = match action {
            Action::AddFile => &self.files_added,
            Action::UpdateFile => &self.files_updated,
            Action::DeleteFile => &self.files_deleted,
            Action::AddDir => &self.dirs_added,
            Action::DeleteDir => &self.dirs_deleted,
            Action::ListDir => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReconcileStats {
        ReconcileStats {
            files_added: self.files_added.load(Ordering::Relaxed),
            files_updated: self.files_updated.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            dirs_added: self.dirs_added.load(Ordering::Relaxed),
            dirs_deleted: self.dirs_deleted.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    job: String,
    options: ReconcileOptions,
    permits: Semaphore,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<Progress>>,
    counters: Counters,
}

/// 协调器，克隆后共享同一个信号量、取消令牌和统计
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new(
        job: impl Into<String>,
        options: ReconcileOptions,
        cancel: CancellationToken,
        events: Option<mpsc::UnboundedSender<Progress>>,
    ) -> Self {
        let permits = Semaphore::new(options.max_concurrency.max(1));
        Self {
            inner: Arc::new(Inner {
                job: job.into(),
                options,
                permits,
                cancel,
                events,
                counters: Counters::default(),
            }),
        }
    }

    pub fn stats(&self) -> ReconcileStats {
        self.inner.counters.snapshot()
    }

    /// 协调整棵树，成功时返回统计
    pub async fn run(&self, source: SyncDir, target: SyncDir) -> SyncResult<ReconcileStats> {
        self.reconcile(source, target).await?;
        Ok(self.stats())
    }

    /// 协调一对目录，递归处理共有子目录
    pub fn reconcile(&self, source: SyncDir, target: SyncDir) -> BoxFuture<'static, SyncResult<()>> {
        let this = self.clone();
        async move { this.reconcile_pair(source, target).await }.boxed()
    }

    async fn reconcile_pair(self, source: SyncDir, target: SyncDir) -> SyncResult<()> {
        self.check_cancelled()?;
        debug!("协调目录: {} -> {}", source.full_name(), target.full_name());

        let (src, dst) = tokio::try_join!(self.list(&source), self.list(&target))?;

        let case_sensitive =
            source.storage().case_sensitive() && target.storage().case_sensitive();
        let key_file = |f: &SyncFile| name_key(f.name(), case_sensitive);
        let key_dir = |d: &SyncDir| name_key(d.name(), case_sensitive);

        let files = keyed_diff(src.files, dst.files, key_file, key_file);
        let dirs = keyed_diff(src.dirs, dst.dirs, key_dir, key_dir);
        let mirror = self.inner.options.mode == SyncMode::Mirror;

        let mut tasks = JoinSet::new();

        // 同名但类型不同的条目：镜像模式下先删后建，放在同一个任务里
        let (mut obsolete_dirs, mut obsolete_files): (HashMap<String, SyncDir>, HashMap<String, SyncFile>) =
            if mirror {
                (
                    dirs.only_right.into_iter().map(|d| (key_dir(&d), d)).collect(),
                    files.only_right.into_iter().map(|f| (key_file(&f), f)).collect(),
                )
            } else {
                (HashMap::new(), HashMap::new())
            };

        for file in files.only_left {
            let this = self.clone();
            let target = target.clone();
            match obsolete_dirs.remove(&key_file(&file)) {
                Some(blocking) => tasks.spawn(async move {
                    this.check_cancelled()?;
                    this.delete_dir(&blocking).await?;
                    this.add_file(&file, &target).await
                }),
                None => tasks.spawn(async move {
                    this.check_cancelled()?;
                    this.add_file(&file, &target).await
                }),
            };
        }

        for dir in dirs.only_left {
            let this = self.clone();
            let target = target.clone();
            match obsolete_files.remove(&key_dir(&dir)) {
                Some(blocking) => tasks.spawn(async move {
                    this.check_cancelled()?;
                    this.delete_file(&blocking).await?;
                    this.add_dir(&dir, &target).await
                }),
                None => tasks.spawn(async move {
                    this.check_cancelled()?;
                    this.add_dir(&dir, &target).await
                }),
            };
        }

        if mirror {
            for file in obsolete_files.into_values() {
                let this = self.clone();
                tasks.spawn(async move {
                    this.check_cancelled()?;
                    this.delete_file(&file).await
                });
            }

            for dir in obsolete_dirs.into_values() {
                let this = self.clone();
                tasks.spawn(async move {
                    this.check_cancelled()?;
                    this.delete_dir(&dir).await
                });
            }

            for (src_file, dst_file) in files.both {
                let this = self.clone();
                let target = target.clone();
                tasks.spawn(async move {
                    this.check_cancelled()?;
                    this.update_file(&src_file, &dst_file, &target).await
                });
            }
        } else {
            self.inner
                .counters
                .files_skipped
                .fetch_add(files.both.len() as u64, Ordering::Relaxed);
        }

        for (src_dir, dst_dir) in dirs.both {
            tasks.spawn(self.reconcile(src_dir, dst_dir));
        }

        settle(tasks).await
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.inner.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn acquire(&self) -> SyncResult<SemaphorePermit<'_>> {
        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
            permit = self.inner.permits.acquire() => permit.map_err(|_| SyncError::Cancelled),
        }
    }

    /// 占用一个许可执行操作，连接错误按指数退避重试，退避期间不占用许可
    async fn attempt<T, F, Fut>(&self, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let options = &self.inner.options;
        let mut attempt = 0u32;
        loop {
            self.check_cancelled()?;
            let result = {
                let _permit = self.acquire().await?;
                op().await
            };

            match result {
                Err(e) if e.is_retryable() && attempt < options.max_retries => {
                    let delay = options.retry_base_delay.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    warn!(
                        "[{}] 操作失败，{}ms 后重试 ({}/{}): {}",
                        self.inner.job,
                        delay.as_millis(),
                        attempt,
                        options.max_retries,
                        e
                    );
                    tokio::select! {
                        _ = self.inner.cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    /// 执行一个条目动作并上报结果
    async fn perform<F, Fut>(&self, action: Action, path: String, op: F) -> SyncResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<u64>>,
    {
        match self.attempt(op).await {
            Ok(bytes) => {
                self.inner.counters.record(action, bytes);
                debug!("[{}] {}: {}", self.inner.job, action.done(), path);
                self.emit(action, path, None);
                Ok(())
            }
            Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) => Err(self.fail(action, path, e)),
        }
    }

    fn fail(&self, action: Action, path: String, err: SyncError) -> SyncError {
        self.inner.counters.failures.fetch_add(1, Ordering::Relaxed);
        error!("[{}] {} 失败 {}: {}", self.inner.job, action.verb(), path, err);
        self.emit(action, path, Some(err.to_string()));
        err
    }

    fn emit(&self, action: Action, path: String, error: Option<String>) {
        if let Some(tx) = &self.inner.events {
            let _ = tx.send(Progress {
                job: self.inner.job.clone(),
                action,
                path,
                error,
            });
        }
    }

    /// 列出目录并去掉被忽略的条目
    async fn list(&self, dir: &SyncDir) -> SyncResult<Listing> {
        let mut listing = match self.attempt(move || dir.list()).await {
            Ok(listing) => listing,
            Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => return Err(self.fail(Action::ListDir, dir.full_name(), e)),
        };

        let filter = &self.inner.options.filter;
        if !filter.is_empty() {
            listing.files.retain(|f| !filter.is_ignored(f.name()));
            listing.dirs.retain(|d| !filter.is_ignored(d.name()));
        }
        Ok(listing)
    }

    async fn add_file(&self, file: &SyncFile, target: &SyncDir) -> SyncResult<()> {
        self.perform(Action::AddFile, target.child_full_name(file.name()), move || {
            file.copy_to(target)
        })
        .await
    }

    async fn add_dir(&self, dir: &SyncDir, target: &SyncDir) -> SyncResult<()> {
        let filter = &self.inner.options.filter;
        self.perform(Action::AddDir, target.child_full_name(dir.name()), move || {
            dir.copy_to(target, filter)
        })
        .await
    }

    async fn delete_file(&self, file: &SyncFile) -> SyncResult<()> {
        self.perform(Action::DeleteFile, file.full_name(), move || async move {
            file.delete().await.map(|_| 0)
        })
        .await
    }

    async fn delete_dir(&self, dir: &SyncDir) -> SyncResult<()> {
        self.perform(Action::DeleteDir, dir.full_name(), move || async move {
            dir.delete().await.map(|_| 0)
        })
        .await
    }

    async fn update_file(&self, src: &SyncFile, dst: &SyncFile, target: &SyncDir) -> SyncResult<()> {
        let comparator = &self.inner.options.comparator;
        let unchanged = match self.attempt(move || comparator.is_unchanged(src, dst)).await {
            Ok(unchanged) => unchanged,
            Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => return Err(self.fail(Action::UpdateFile, dst.full_name(), e)),
        };

        if unchanged {
            self.inner.counters.files_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        self.check_cancelled()?;
        self.perform(Action::UpdateFile, dst.full_name(), move || src.copy_to(target))
            .await
    }
}

/// 等待本层所有任务结束；兄弟条目的失败不会中断其他条目，返回第一个错误
async fn settle(mut tasks: JoinSet<SyncResult<()>>) -> SyncResult<()> {
    let mut first_error: Option<SyncError> = None;

    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SyncError::Cancelled),
        };

        if let Err(e) = result {
            let replace = match &first_error {
                None => true,
                Some(SyncError::Cancelled) => !matches!(e, SyncError::Cancelled),
                Some(_) => false,
            };
            if replace {
                first_error = Some(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
